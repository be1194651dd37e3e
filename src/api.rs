//! REST data transfer objects and request plumbing for the dispatch backend.
//!
//! DTOs are distinct from domain types and represent the API contract; every
//! response funnels through one decoding path so status mapping and body
//! parsing behave identically across endpoints.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    AppError, AppResult, DispatcherContact, DispatcherId, EmergencyType, ErrorKind, Facility,
    FacilityId, GeoPoint, IncidentId, IncidentLocation, IncidentPatch, IncidentRecord,
    ResponderPhase, ResponderProfile, UserId,
};

/// Build the fetch-by-id URL for one incident.
#[must_use]
pub fn incident_url(base: &str, incident_id: &IncidentId) -> String {
    format!("{}/api/v1/incidents/{incident_id}", trim_base(base))
}

/// Active incidents currently assigned to a responder.
#[must_use]
pub fn active_incidents_url(base: &str, responder_id: &UserId) -> String {
    format!(
        "{}/api/v1/responders/{responder_id}/incidents?active=true",
        trim_base(base)
    )
}

#[must_use]
pub fn responder_url(base: &str, responder_id: &UserId) -> String {
    format!("{}/api/v1/responders/{responder_id}", trim_base(base))
}

#[must_use]
pub fn facilities_url(base: &str, emergency_type: EmergencyType) -> String {
    format!(
        "{}/api/v1/facilities?emergency_type={}",
        trim_base(base),
        emergency_type.as_str()
    )
}

#[must_use]
pub fn hospitals_url(base: &str) -> String {
    format!("{}/api/v1/hospitals", trim_base(base))
}

fn trim_base(base: &str) -> &str {
    base.trim_end_matches('/')
}

/// Incident as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentDto {
    pub id: String,
    pub emergency_type: String,
    /// Backend lifecycle status, not the responder-visible phase.
    pub status: String,
    #[serde(default)]
    pub is_finished: bool,
    pub location: LocationDto,
    #[serde(default)]
    pub dispatcher: Option<DispatcherDto>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub responder_status: Option<String>,
    #[serde(default)]
    pub reported_at_ms: u64,
}

impl IncidentDto {
    #[must_use]
    pub fn emergency_type(&self) -> EmergencyType {
        EmergencyType::from_str(&self.emergency_type).unwrap_or_default()
    }

    /// Rebuild the responder's durable record from the server's view, used
    /// when recovering an in-flight assignment after reinstall or data loss.
    pub fn to_record(&self, now_ms: u64) -> AppResult<IncidentRecord> {
        let location = self.location.to_domain()?;
        let dispatcher = self
            .dispatcher
            .clone()
            .map_or_else(DispatcherContact::unknown, DispatcherDto::to_domain);
        let phase = self
            .responder_status
            .as_deref()
            .and_then(parse_phase)
            .unwrap_or_default();

        Ok(IncidentRecord {
            incident_id: IncidentId::new(self.id.clone()),
            emergency_type: self.emergency_type(),
            location,
            dispatcher,
            phase,
            selected_facility: None,
            closure_requested: false,
            accepted_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationDto {
    pub lat: f64,
    pub lng: f64,
}

impl LocationDto {
    pub fn to_domain(self) -> AppResult<IncidentLocation> {
        let point = GeoPoint::new(self.lat, self.lng)?;
        Ok(IncidentLocation {
            point,
            address: None,
            landmark: None,
        })
    }

    #[must_use]
    pub fn from_domain(location: &IncidentLocation) -> Self {
        Self {
            lat: location.point.lat(),
            lng: location.point.lng(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherDto {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub lgu_name: Option<String>,
}

impl DispatcherDto {
    #[must_use]
    pub fn to_domain(self) -> DispatcherContact {
        DispatcherContact {
            dispatcher_id: DispatcherId::new(self.id),
            name: self.name,
            phone: self.phone,
            lgu_name: self.lgu_name,
        }
    }
}

impl DispatcherContact {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            dispatcher_id: DispatcherId::unknown(),
            name: None,
            phone: None,
            lgu_name: None,
        }
    }
}

/// Partial update of an incident. Only the fields present in the patch are
/// serialized, so the backend treats the request as PATCH-like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IncidentUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure_requested: Option<bool>,
}

impl IncidentUpdateRequest {
    #[must_use]
    pub fn from_patch(patch: &IncidentPatch) -> Self {
        Self {
            responder_status: patch.phase.map(|p| p.as_str().to_string()),
            location: patch.location.as_ref().map(LocationDto::from_domain),
            facility_id: patch
                .selected_facility
                .as_ref()
                .map(|f| f.id.as_str().to_string()),
            closure_requested: patch.closure_requested,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub emergency_type: Option<String>,
}

impl FacilityDto {
    #[must_use]
    pub fn to_domain(self) -> Facility {
        let emergency_type = self
            .emergency_type
            .as_deref()
            .and_then(EmergencyType::from_str)
            .unwrap_or(EmergencyType::General);
        Facility {
            id: FacilityId::new(self.id),
            name: self.name,
            address: self.address,
            emergency_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityListResponse {
    pub facilities: Vec<FacilityDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentListResponse {
    pub incidents: Vec<IncidentDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl ResponderDto {
    #[must_use]
    pub fn to_domain(self) -> ResponderProfile {
        ResponderProfile {
            id: UserId::new(self.id),
            name: self.name,
            agency: self.agency,
            unit: self.unit,
        }
    }
}

/// Create-or-fetch by name and address; the backend deduplicates, so
/// resending the same hospital yields the existing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HospitalCreateRequest {
    pub name: String,
    pub address: String,
}

#[must_use]
pub fn parse_phase(s: &str) -> Option<ResponderPhase> {
    match s.to_lowercase().as_str() {
        "enroute" | "en_route" => Some(ResponderPhase::Enroute),
        "onscene" | "on_scene" => Some(ResponderPhase::OnScene),
        "facility" | "at_facility" => Some(ResponderPhase::AtFacility),
        "rtb" => Some(ResponderPhase::Rtb),
        _ => None,
    }
}

/// Decode a crux_http response into a typed body. Transport failures map to
/// `Network`, non-2xx statuses through `AppError::from_http_status`, and
/// undecodable bodies to `Deserialization`.
pub fn decode_json<T: DeserializeOwned>(
    result: crux_http::Result<crux_http::Response<Vec<u8>>>,
) -> AppResult<T> {
    let mut response =
        result.map_err(|e| AppError::new(ErrorKind::Network, e.to_string()))?;

    let status: u16 = response.status().into();
    let body = response.take_body();

    if !(200..300).contains(&status) {
        return Err(AppError::from_http_status(status, body.as_deref()));
    }

    serde_json::from_slice(&body.unwrap_or_default())
        .map_err(|e| AppError::new(ErrorKind::Deserialization, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_tolerate_trailing_slash_on_base() {
        let id = IncidentId::new("INC-1");
        assert_eq!(
            incident_url("https://api.example/", &id),
            "https://api.example/api/v1/incidents/INC-1"
        );
        assert_eq!(
            incident_url("https://api.example", &id),
            "https://api.example/api/v1/incidents/INC-1"
        );
    }

    #[test]
    fn facility_url_carries_the_assignment_type() {
        let url = facilities_url("https://api.example", EmergencyType::Medical);
        assert!(url.ends_with("/api/v1/facilities?emergency_type=medical"));
    }

    #[test]
    fn update_request_serializes_only_patched_fields() {
        let patch = IncidentPatch::phase(ResponderPhase::OnScene);
        let request = IncidentUpdateRequest::from_patch(&patch);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["responder_status"], "onscene");
        assert!(json.get("location").is_none());
        assert!(json.get("facility_id").is_none());
        assert!(json.get("closure_requested").is_none());
    }

    #[test]
    fn location_dto_rejects_invalid_coordinates() {
        let dto = LocationDto {
            lat: 200.0,
            lng: 0.0,
        };
        assert!(dto.to_domain().is_err());
    }

    #[test]
    fn incident_dto_rebuilds_a_record() {
        let dto = IncidentDto {
            id: "INC-7".into(),
            emergency_type: "medical".into(),
            status: "ongoing".into(),
            is_finished: false,
            location: LocationDto {
                lat: 14.6,
                lng: 121.0,
            },
            dispatcher: Some(DispatcherDto {
                id: "disp-3".into(),
                name: Some("Central".into()),
                phone: None,
                lgu_name: None,
            }),
            description: None,
            responder_status: Some("onscene".into()),
            reported_at_ms: 1_000,
        };

        let record = dto.to_record(5_000).unwrap();
        assert_eq!(record.incident_id.as_str(), "INC-7");
        assert_eq!(record.emergency_type, EmergencyType::Medical);
        assert_eq!(record.phase, ResponderPhase::OnScene);
        assert_eq!(record.dispatcher.dispatcher_id.as_str(), "disp-3");
        assert_eq!(record.accepted_at_ms, 5_000);
    }

    #[test]
    fn missing_dispatcher_falls_back_to_unknown() {
        let dto = IncidentDto {
            id: "INC-8".into(),
            emergency_type: "fire".into(),
            status: "ongoing".into(),
            is_finished: false,
            location: LocationDto { lat: 0.0, lng: 0.0 },
            dispatcher: None,
            description: None,
            responder_status: None,
            reported_at_ms: 0,
        };

        let record = dto.to_record(0).unwrap();
        assert_eq!(record.dispatcher.dispatcher_id.as_str(), "unknown");
        assert_eq!(record.phase, ResponderPhase::Enroute);
    }

    #[test]
    fn unknown_facility_type_degrades_to_general() {
        let dto = FacilityDto {
            id: "fac-1".into(),
            name: "Motor Pool".into(),
            address: None,
            emergency_type: Some("garage".into()),
        };
        assert_eq!(dto.to_domain().emergency_type, EmergencyType::General);
    }

    #[test]
    fn phase_parsing_accepts_both_spellings() {
        assert_eq!(parse_phase("enroute"), Some(ResponderPhase::Enroute));
        assert_eq!(parse_phase("en_route"), Some(ResponderPhase::Enroute));
        assert_eq!(parse_phase("ON_SCENE"), Some(ResponderPhase::OnScene));
        assert_eq!(parse_phase("rtb"), Some(ResponderPhase::Rtb));
        assert_eq!(parse_phase("warp"), None);
    }
}
