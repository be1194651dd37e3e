#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod api;
pub mod app;
pub mod capabilities;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::App as CruxApp;

use capabilities::{RealtimeResult, ReconnectPolicy, StorageError, TimerId, TimerOutput};

pub const RESPONDER_ROLE: &str = "responder";
pub const UNKNOWN_DISPATCHER: &str = "unknown";

pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const ACK_TIMEOUT_MS: u64 = 5_000;
pub const CLOSURE_POLL_INTERVAL_MS: u64 = 5_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;
pub const RECONNECT_MIN_DELAY_MS: u64 = 1_000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 10_000;

pub const MAX_DENIED_OFFERS: usize = 256;
pub const DESCRIPTION_PREVIEW_LENGTH: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    Transport,
    NotConnected,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Transport => "TRANSPORT_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Timeout
            | Self::Conflict
            | Self::RateLimited
            | Self::Storage
            | Self::Transport
            | Self::NotConnected => ErrorSeverity::Transient,

            Self::Serialization | Self::Deserialization | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }

            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimited
                | Self::Storage
                | Self::Conflict
                | Self::Transport
                | Self::NotConnected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your signal and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => "You don't have permission to perform this action.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "The requested record could not be found.".into(),
            ErrorKind::Conflict => {
                "This action conflicts with a recent change. Please refresh and try again.".into()
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment.".into(),
            ErrorKind::Storage => "Unable to save data on this device.".into(),
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Transport | ErrorKind::NotConnected => {
                "Connection to dispatch lost. Reconnecting...".into()
            }
            ErrorKind::InvalidState => "The app is in an invalid state. Please restart it.".into(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 => ErrorKind::Validation,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .map(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        let kind = match &e {
            StorageError::Serialization { .. } => ErrorKind::Serialization,
            _ => ErrorKind::Storage,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<capabilities::RealtimeError> for AppError {
    fn from(e: capabilities::RealtimeError) -> Self {
        let kind = match &e {
            capabilities::RealtimeError::NotConnected => ErrorKind::NotConnected,
            capabilities::RealtimeError::AuthRejected { .. } => ErrorKind::Authentication,
            capabilities::RealtimeError::InvalidConfig { .. } => ErrorKind::Validation,
            _ => ErrorKind::Transport,
        };
        Self::new(kind, e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(UserId);
typed_id!(IncidentId);
typed_id!(DispatcherId);
typed_id!(FacilityId);
typed_id!(RoomId);
typed_id!(RequestId);

impl RequestId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl RoomId {
    /// Room scoped to one incident, joined when the responder accepts its
    /// offer.
    #[must_use]
    pub fn for_incident(incident_id: &IncidentId) -> Self {
        Self(format!("incident:{incident_id}"))
    }
}

impl DispatcherId {
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_DISPATCHER.to_string())
    }
}

// --- Validation ---

#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("invalid coordinate: lat={0}, lng={1}")]
    InvalidCoordinate(f64, f64),
    #[error("value too long ({len} > {max})")]
    TooLong { len: usize, max: usize },
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        if !lat.is_finite()
            || !lng.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lng)
        {
            return Err(ValidationError::InvalidCoordinate(lat, lng));
        }
        Ok(Self { lat, lng })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lng(self) -> f64 {
        self.lng
    }
}

impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        self.lat.to_bits() == other.lat.to_bits() && self.lng.to_bits() == other.lng.to_bits()
    }
}

impl Eq for GeoPoint {}

// --- Session ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Unknown,
    Authenticated,
    Anonymous,
}

/// Authentication token plus current-user identity. All mutation funnels
/// through the named constructors, which is what upholds the invariant:
/// `Authenticated` implies both token and user id are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Session {
    token: Option<String>,
    user_id: Option<UserId>,
    auth: AuthState,
}

impl Session {
    #[must_use]
    pub fn authenticated(token: impl Into<String>, user_id: UserId) -> Self {
        Self {
            token: Some(token.into()),
            user_id: Some(user_id),
            auth: AuthState::Authenticated,
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            token: None,
            user_id: None,
            auth: AuthState::Anonymous,
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    #[must_use]
    pub const fn auth_state(&self) -> AuthState {
        self.auth
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated)
    }
}

// --- Presence ---

/// Self-declared availability. Toggled only by explicit responder action and
/// never persisted: every cold start begins offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence {
    online: bool,
}

impl Presence {
    pub fn check_in(&mut self) {
        self.online = true;
    }

    pub fn check_out(&mut self) {
        self.online = false;
    }

    #[must_use]
    pub const fn is_online(self) -> bool {
        self.online
    }
}

// --- Connection ---

/// Owned exclusively by the connection manager; everything else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub opening: bool,
    pub reconnect_attempts: u32,
}

impl ConnectionState {
    pub fn mark_opening(&mut self) {
        self.opening = true;
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.opening = false;
        self.reconnect_attempts = 0;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.opening = false;
    }

    pub fn observe_reconnect_attempt(&mut self, attempt: u32) {
        self.reconnect_attempts = attempt;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionBanner {
    #[default]
    Offline,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
    ConnectionLost,
}

// --- Domain enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    #[default]
    Medical,
    Fire,
    Crime,
    Rescue,
    General,
}

impl EmergencyType {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "medical" | "ambulance" => Some(Self::Medical),
            "fire" => Some(Self::Fire),
            "crime" | "police" => Some(Self::Crime),
            "rescue" => Some(Self::Rescue),
            "general" | "other" => Some(Self::General),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Fire => "fire",
            Self::Crime => "crime",
            Self::Rescue => "rescue",
            Self::General => "general",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Medical => "Medical",
            Self::Fire => "Fire",
            Self::Crime => "Crime",
            Self::Rescue => "Rescue",
            Self::General => "General",
        }
    }

    /// Whether responders on this emergency type transport to a facility
    /// before returning to base.
    #[must_use]
    pub const fn uses_facility(self) -> bool {
        matches!(self, Self::Medical | Self::Rescue)
    }
}

impl std::fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The responder-visible workflow phase of the incident they are handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponderPhase {
    #[default]
    Enroute,
    OnScene,
    AtFacility,
    Rtb,
}

impl ResponderPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enroute => "enroute",
            Self::OnScene => "onscene",
            Self::AtFacility => "facility",
            Self::Rtb => "rtb",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Enroute => "En Route",
            Self::OnScene => "On Scene",
            Self::AtFacility => "At Facility",
            Self::Rtb => "Return To Base",
        }
    }

    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::Enroute => vec![Self::OnScene],
            Self::OnScene => vec![Self::AtFacility, Self::Rtb],
            Self::AtFacility => vec![Self::Rtb],
            Self::Rtb => vec![],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: Self) -> Result<(), TransitionError> {
        if self == to {
            return Err(TransitionError::SamePhase);
        }
        if !self.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { from: self, to });
        }
        Ok(())
    }
}

impl std::fmt::Display for ResponderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("already in that phase")]
    SamePhase,
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ResponderPhase,
        to: ResponderPhase,
    },
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string())
    }
}

/// How an offer was settled independently of this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferResolution {
    AcceptedElsewhere,
    Declined,
}

// --- Incident data ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentLocation {
    pub point: GeoPoint,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub landmark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherContact {
    pub dispatcher_id: DispatcherId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub lgu_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub emergency_type: EmergencyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    pub incident_id: IncidentId,
    pub emergency_type: EmergencyType,
    pub location: IncidentLocation,
    #[serde(default)]
    pub description: Option<String>,
    pub reported_at_ms: u64,
}

impl IncidentSnapshot {
    #[must_use]
    pub fn description_preview(&self, max_len: usize) -> String {
        self.description
            .as_ref()
            .map(|d| {
                if d.chars().count() <= max_len {
                    d.clone()
                } else {
                    let mut preview: String = d.chars().take(max_len.saturating_sub(3)).collect();
                    preview.push_str("...");
                    preview
                }
            })
            .unwrap_or_default()
    }
}

/// An incident proposed to this responder, held in memory only. At most one
/// exists at a time; a newer offer replaces an unanswered one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentOffer {
    pub incident_id: IncidentId,
    pub dispatcher_id: DispatcherId,
    pub incident: IncidentSnapshot,
    pub received_at_ms: u64,
}

/// The responder's durable view of the incident they are actively handling.
/// Persisted per user id; survives restarts; destroyed on closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: IncidentId,
    pub emergency_type: EmergencyType,
    pub location: IncidentLocation,
    pub dispatcher: DispatcherContact,
    pub phase: ResponderPhase,
    #[serde(default)]
    pub selected_facility: Option<Facility>,
    #[serde(default)]
    pub closure_requested: bool,
    pub accepted_at_ms: u64,
    pub updated_at_ms: u64,
}

impl IncidentRecord {
    #[must_use]
    pub fn from_offer(offer: &IncidentOffer, now_ms: u64) -> Self {
        Self {
            incident_id: offer.incident_id.clone(),
            emergency_type: offer.incident.emergency_type,
            location: offer.incident.location.clone(),
            dispatcher: DispatcherContact {
                dispatcher_id: offer.dispatcher_id.clone(),
                name: None,
                phone: None,
                lgu_name: None,
            },
            phase: ResponderPhase::Enroute,
            selected_facility: None,
            closure_requested: false,
            accepted_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Merge a partial update into this record. Fields absent from the patch
    /// keep their previous value.
    pub fn apply(&mut self, patch: &IncidentPatch, now_ms: u64) {
        if let Some(phase) = patch.phase {
            self.phase = phase;
        }
        if let Some(location) = &patch.location {
            self.location = location.clone();
        }
        if let Some(facility) = &patch.selected_facility {
            self.selected_facility = Some(facility.clone());
        }
        if let Some(closure) = patch.closure_requested {
            self.closure_requested = closure;
        }
        self.updated_at_ms = now_ms;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IncidentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ResponderPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<IncidentLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_facility: Option<Facility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure_requested: Option<bool>,
}

impl IncidentPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.phase.is_none()
            && self.location.is_none()
            && self.selected_facility.is_none()
            && self.closure_requested.is_none()
    }

    #[must_use]
    pub fn phase(phase: ResponderPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn facility(facility: Facility) -> Self {
        Self {
            selected_facility: Some(facility),
            ..Self::default()
        }
    }
}

// --- Form buffers ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VitalSigns {
    #[serde(default)]
    pub blood_pressure: Option<String>,
    #[serde(default)]
    pub pulse_bpm: Option<u16>,
    #[serde(default)]
    pub respiratory_rate: Option<u16>,
    #[serde(default)]
    pub temperature_c: Option<f32>,
    #[serde(default)]
    pub oxygen_saturation: Option<u8>,
    pub recorded_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PatientDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Draft form data buffered while the responder works an incident. Persisted
/// per user alongside the incident record and wiped with it on closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FormBuffers {
    #[serde(default)]
    pub vitals: Option<VitalSigns>,
    #[serde(default)]
    pub patient: Option<PatientDetails>,
}

impl FormBuffers {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.vitals.is_none() && self.patient.is_none()
    }
}

// --- Responder profile ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderProfile {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

// --- Toasts ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub created_at_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at_ms: get_current_time_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

// --- Configuration ---

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid url for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("invalid tunable {field}: {reason}")]
    InvalidTunable { field: &'static str, reason: String },
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string())
    }
}

/// Startup configuration supplied by the shell (environment/config file).
/// There is no CLI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub api_base_url: String,
    pub realtime_url: String,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub closure_poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.dispatch.example".to_string(),
            realtime_url: "wss://rt.dispatch.example".to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            ack_timeout_ms: ACK_TIMEOUT_MS,
            closure_poll_interval_ms: CLOSURE_POLL_INTERVAL_MS,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::check_url("api_base_url", &self.api_base_url, &["http", "https"])?;
        Self::check_url(
            "realtime_url",
            &self.realtime_url,
            &["ws", "wss", "http", "https"],
        )?;

        self.reconnect
            .validate()
            .map_err(|e| ConfigError::InvalidTunable {
                field: "reconnect",
                reason: e.to_string(),
            })?;

        for (field, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("closure_poll_interval_ms", self.closure_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidTunable {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    fn check_url(
        field: &'static str,
        value: &str,
        allowed_schemes: &[&str],
    ) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
            field,
            reason: e.to_string(),
        })?;

        if !allowed_schemes.contains(&parsed.scheme()) {
            return Err(ConfigError::InvalidUrl {
                field,
                reason: format!("scheme '{}' is not allowed", parsed.scheme()),
            });
        }

        if parsed.host_str().is_none() {
            return Err(ConfigError::InvalidUrl {
                field,
                reason: "missing host".to_string(),
            });
        }

        Ok(())
    }
}

// --- In-flight bookkeeping ---

/// One outstanding request/response call over the live connection, racing the
/// server's acknowledgement against its own timeout timer. Whichever side
/// removes the entry first wins; the loser finds nothing and becomes a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStatusRequest {
    pub incident_id: IncidentId,
    pub timer_id: TimerId,
    pub requested_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosurePoll {
    pub incident_id: IncidentId,
    pub timer_id: TimerId,
}

/// Parsed body of a status-query acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub incident_id: IncidentId,
    pub status: String,
}

// --- Model ---

#[derive(Default)]
pub struct Model {
    pub config: AppConfig,
    pub session: Session,
    pub presence: Presence,
    pub connection: ConnectionState,
    pub pending_offer: Option<IncidentOffer>,
    pub active_incident: Option<IncidentRecord>,
    pub forms: FormBuffers,
    pub denied_offers: HashSet<IncidentId>,
    pub heartbeat_timer: Option<TimerId>,
    pub status_requests: HashMap<RequestId, PendingStatusRequest>,
    pub last_status_report: Option<AppResult<StatusReport>>,
    pub closure_poll: Option<ClosurePoll>,
    pub facilities: Vec<Facility>,
    pub responder_profile: Option<ResponderProfile>,
    pub active_error: Option<AppError>,
    pub toast: Option<ToastMessage>,
    pub navigate_home: bool,
    timer_seq: u64,
}

impl Model {
    pub fn next_timer_id(&mut self) -> TimerId {
        self.timer_seq += 1;
        TimerId(self.timer_seq)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    #[must_use]
    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_timer.is_some()
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind) {
        self.toast = Some(ToastMessage::new(message, kind));
    }

    pub fn record_denied_offer(&mut self, incident_id: IncidentId) {
        if self.denied_offers.len() >= MAX_DENIED_OFFERS {
            self.denied_offers.clear();
        }
        self.denied_offers.insert(incident_id);
    }

    #[must_use]
    pub fn has_declined(&self, incident_id: &IncidentId) -> bool {
        self.denied_offers.contains(incident_id)
    }

    /// Find the outstanding status request a timer belongs to, if any.
    #[must_use]
    pub fn status_request_for_timer(&self, timer_id: TimerId) -> Option<RequestId> {
        self.status_requests
            .iter()
            .find(|(_, pending)| pending.timer_id == timer_id)
            .map(|(request_id, _)| request_id.clone())
    }

    #[must_use]
    pub fn connection_banner(&self) -> ConnectionBanner {
        if !self.presence.is_online() || !self.is_authenticated() {
            return ConnectionBanner::Offline;
        }
        if self.connection.connected {
            return ConnectionBanner::Connected;
        }
        if self.connection.reconnect_attempts > 0 {
            return ConnectionBanner::Reconnecting {
                attempt: self.connection.reconnect_attempts,
            };
        }
        if self.connection.opening {
            return ConnectionBanner::Connecting;
        }
        ConnectionBanner::ConnectionLost
    }
}

// --- Events ---

#[derive(Debug, Clone)]
pub enum Event {
    // App lifecycle
    AppStarted {
        config: Box<AppConfig>,
    },
    SessionRestored {
        result: Box<Result<capabilities::StorageOutput, StorageError>>,
    },
    LoginCompleted {
        token: String,
        user_id: String,
    },
    LogoutRequested,

    // Presence
    CheckInRequested,
    CheckOutRequested,

    // Transport lifecycle (shell-driven)
    TransportOpened {
        result: Box<RealtimeResult>,
    },
    TransportDisconnected {
        reason: String,
    },
    TransportReconnecting {
        attempt: u32,
    },
    TransportReconnected,
    TransportReconnectExhausted,

    // Offers
    OfferReceived(Box<IncidentOffer>),
    OfferResolvedElsewhere {
        incident_id: IncidentId,
        resolution: OfferResolution,
    },
    OfferResponseRequested {
        incident_id: IncidentId,
        accepted: bool,
    },
    ClearDeniedOffers,

    // Timers
    TimerElapsed(TimerOutput),

    // Status queries over the live connection
    StatusQueryRequested {
        incident_id: IncidentId,
    },
    AckReceived {
        request_id: RequestId,
        result: Box<RealtimeResult>,
    },

    // Incident workflow
    IncidentPhaseRequested {
        phase: ResponderPhase,
    },
    FacilitySelected(Box<Facility>),
    VitalsUpdated(Box<VitalSigns>),
    PatientDetailsUpdated(Box<PatientDetails>),
    IncidentSyncResponse {
        incident_id: IncidentId,
        result: Box<AppResult<api::IncidentDto>>,
    },
    IncidentRestored {
        result: Box<Result<capabilities::StorageOutput, StorageError>>,
    },
    FormsRestored {
        result: Box<Result<capabilities::StorageOutput, StorageError>>,
    },

    // REST surface
    FacilitiesRequested,
    FacilitiesResponse {
        result: Box<AppResult<Vec<Facility>>>,
    },
    ResponderProfileRequested,
    ResponderProfileResponse {
        result: Box<AppResult<ResponderProfile>>,
    },
    HospitalResolveRequested {
        name: String,
        address: String,
    },
    HospitalResolveResponse {
        result: Box<AppResult<Facility>>,
    },
    ActiveIncidentsRequested,
    ActiveIncidentsResponse {
        result: Box<AppResult<Vec<api::IncidentDto>>>,
    },

    // Closure approval polling
    ClosureRequested,
    ClosurePollStarted {
        incident_id: IncidentId,
    },
    ClosurePollStopped,
    ClosurePollResponse {
        result: Box<AppResult<api::IncidentDto>>,
    },

    // Persistence acknowledgements (log-only)
    SnapshotPersisted {
        result: Box<Result<capabilities::StorageOutput, StorageError>>,
    },

    // UI
    DismissError,
    DismissToast,
    NavigationConsumed,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AppStarted { .. } => "app_started",
            Self::SessionRestored { .. } => "session_restored",
            Self::LoginCompleted { .. } => "login_completed",
            Self::LogoutRequested => "logout_requested",
            Self::CheckInRequested => "check_in_requested",
            Self::CheckOutRequested => "check_out_requested",
            Self::TransportOpened { .. } => "transport_opened",
            Self::TransportDisconnected { .. } => "transport_disconnected",
            Self::TransportReconnecting { .. } => "transport_reconnecting",
            Self::TransportReconnected => "transport_reconnected",
            Self::TransportReconnectExhausted => "transport_reconnect_exhausted",
            Self::OfferReceived(_) => "offer_received",
            Self::OfferResolvedElsewhere { .. } => "offer_resolved_elsewhere",
            Self::OfferResponseRequested { .. } => "offer_response_requested",
            Self::ClearDeniedOffers => "clear_denied_offers",
            Self::TimerElapsed(_) => "timer_elapsed",
            Self::StatusQueryRequested { .. } => "status_query_requested",
            Self::AckReceived { .. } => "ack_received",
            Self::IncidentPhaseRequested { .. } => "incident_phase_requested",
            Self::FacilitySelected(_) => "facility_selected",
            Self::VitalsUpdated(_) => "vitals_updated",
            Self::PatientDetailsUpdated(_) => "patient_details_updated",
            Self::IncidentSyncResponse { .. } => "incident_sync_response",
            Self::IncidentRestored { .. } => "incident_restored",
            Self::FormsRestored { .. } => "forms_restored",
            Self::FacilitiesRequested => "facilities_requested",
            Self::FacilitiesResponse { .. } => "facilities_response",
            Self::ResponderProfileRequested => "responder_profile_requested",
            Self::ResponderProfileResponse { .. } => "responder_profile_response",
            Self::HospitalResolveRequested { .. } => "hospital_resolve_requested",
            Self::HospitalResolveResponse { .. } => "hospital_resolve_response",
            Self::ActiveIncidentsRequested => "active_incidents_requested",
            Self::ActiveIncidentsResponse { .. } => "active_incidents_response",
            Self::ClosureRequested => "closure_requested",
            Self::ClosurePollStarted { .. } => "closure_poll_started",
            Self::ClosurePollStopped => "closure_poll_stopped",
            Self::ClosurePollResponse { .. } => "closure_poll_response",
            Self::SnapshotPersisted { .. } => "snapshot_persisted",
            Self::DismissError => "dismiss_error",
            Self::DismissToast => "dismiss_toast",
            Self::NavigationConsumed => "navigation_consumed",
        }
    }
}

// --- View model ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferCard {
    pub incident_id: String,
    pub emergency_type: EmergencyType,
    pub description_preview: String,
    pub address: Option<String>,
    pub landmark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSummaryView {
    pub incident_id: String,
    pub emergency_type: EmergencyType,
    pub phase: ResponderPhase,
    pub phase_label: String,
    pub available_transitions: Vec<ResponderPhase>,
    pub facility_name: Option<String>,
    pub dispatcher_name: Option<String>,
    pub dispatcher_phone: Option<String>,
    pub closure_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub banner: ConnectionBanner,
    pub online: bool,
    pub authenticated: bool,
    pub pending_offer: Option<OfferCard>,
    pub incident: Option<IncidentSummaryView>,
    pub awaiting_closure: bool,
    pub facilities: Vec<Facility>,
    pub error_message: Option<String>,
    pub error_is_retryable: bool,
    pub toast: Option<ToastMessage>,
    pub navigate_home: bool,
    pub status_report: Option<AppResult<StatusReport>>,
}
