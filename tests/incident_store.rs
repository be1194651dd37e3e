use assert_matches::assert_matches;
use crux_core::testing::AppTester;

use responder_core::api::{IncidentDto, LocationDto};
use responder_core::capabilities::{
    RealtimeOutput, StorageOperation, StorageOutput, TimerOperation, TimerOutput,
};
use responder_core::{
    App, DispatcherId, Effect, EmergencyType, Event, GeoPoint, IncidentId, IncidentLocation,
    IncidentOffer, IncidentRecord, IncidentSnapshot, Model, ResponderPhase, Session, UserId,
    VitalSigns,
};

fn offer(incident_id: &str) -> IncidentOffer {
    IncidentOffer {
        incident_id: IncidentId::new(incident_id),
        dispatcher_id: DispatcherId::new("disp-1"),
        incident: IncidentSnapshot {
            incident_id: IncidentId::new(incident_id),
            emergency_type: EmergencyType::Medical,
            location: IncidentLocation {
                point: GeoPoint::new(14.6, 121.0).unwrap(),
                address: Some("Taft Ave".into()),
                landmark: None,
            },
            description: Some("chest pain".into()),
            reported_at_ms: 5,
        },
        received_at_ms: 5,
    }
}

fn incident_dto(id: &str, is_finished: bool) -> IncidentDto {
    IncidentDto {
        id: id.into(),
        emergency_type: "medical".into(),
        status: if is_finished { "closed".into() } else { "ongoing".into() },
        is_finished,
        location: LocationDto {
            lat: 14.6,
            lng: 121.0,
        },
        dispatcher: None,
        description: None,
        responder_status: Some("rtb".into()),
        reported_at_ms: 5,
    }
}

fn connected_model(app: &AppTester<App, Effect>, user_id: &str) -> Model {
    let mut model = Model::default();
    model.session = Session::authenticated("jwt", UserId::new(user_id));
    let _ = app.update(Event::CheckInRequested, &mut model);
    let _ = app.update(
        Event::TransportOpened {
            result: Box::new(Ok(RealtimeOutput::Opened)),
        },
        &mut model,
    );
    model
}

fn storage_ops(effects: &[Effect]) -> Vec<StorageOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Storage(req) => Some(req.operation.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn accepted_incident_round_trips_through_storage_per_user() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-1"))), &mut model);
    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-1"),
            accepted: true,
        },
        &mut model,
    );

    let original = model.active_incident.clone().unwrap();

    // Capture the bytes the core asked the shell to persist, scoped to the
    // signed-in user.
    let ops = storage_ops(&update.effects);
    let (key, value) = ops
        .iter()
        .find_map(|op| match op {
            StorageOperation::Set { key, value } => Some((key.clone(), value.clone())),
            _ => None,
        })
        .expect("accepting must persist the incident record");
    assert_eq!(key.raw(), "incident:resp-1");

    // Cold start on the same device, same user: the stored snapshot hydrates
    // an equivalent record, field for field.
    let app = AppTester::<App, Effect>::default();
    let mut restarted = Model::default();
    restarted.session = Session::authenticated("jwt", UserId::new("resp-1"));
    let _ = app.update(
        Event::IncidentRestored {
            result: Box::new(Ok(StorageOutput::Value(Some(value)))),
        },
        &mut restarted,
    );

    let restored = restarted.active_incident.as_ref().unwrap();
    assert_eq!(restored, &original);
}

#[test]
fn a_different_user_reads_a_different_key() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-2");

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-9"))), &mut model);
    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-9"),
            accepted: true,
        },
        &mut model,
    );

    let ops = storage_ops(&update.effects);
    assert!(ops.iter().any(|op| matches!(
        op,
        StorageOperation::Set { key, .. } if key.raw() == "incident:resp-2"
    )));

    // Restoring "no stored value" for a user leaves the model empty.
    let mut other_user = Model::default();
    other_user.session = Session::authenticated("jwt", UserId::new("resp-3"));
    let _ = app.update(
        Event::IncidentRestored {
            result: Box::new(Ok(StorageOutput::Value(None))),
        },
        &mut other_user,
    );
    assert!(other_user.active_incident.is_none());
}

#[test]
fn corrupt_stored_snapshot_degrades_to_no_value() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.session = Session::authenticated("jwt", UserId::new("resp-1"));

    let _ = app.update(
        Event::IncidentRestored {
            result: Box::new(Ok(StorageOutput::Value(Some(b"{not json".to_vec())))),
        },
        &mut model,
    );
    assert!(model.active_incident.is_none());
    assert!(model.active_error.is_none());
}

#[test]
fn vitals_are_buffered_and_persisted_per_user() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");
    model.active_incident = Some(IncidentRecord::from_offer(&offer("INC-1"), 0));

    let vitals = VitalSigns {
        blood_pressure: Some("120/80".into()),
        pulse_bpm: Some(88),
        respiratory_rate: Some(17),
        temperature_c: Some(36.8),
        oxygen_saturation: Some(97),
        recorded_at_ms: 123,
    };
    let update = app.update(Event::VitalsUpdated(Box::new(vitals.clone())), &mut model);

    assert_eq!(model.forms.vitals, Some(vitals));
    let ops = storage_ops(&update.effects);
    assert!(ops.iter().any(|op| matches!(
        op,
        StorageOperation::Set { key, .. } if key.raw() == "forms:resp-1"
    )));
}

#[test]
fn closure_request_starts_fixed_interval_polling() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");
    let mut record = IncidentRecord::from_offer(&offer("INC-1"), 0);
    record.phase = ResponderPhase::Rtb;
    model.active_incident = Some(record);

    let update = app.update(Event::ClosureRequested, &mut model);

    assert!(model.closure_poll.is_some());
    // One immediate check plus the incident update itself.
    let http_count = update
        .effects
        .iter()
        .filter(|e| matches!(e, Effect::Http(_)))
        .count();
    assert!(http_count >= 2);
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Timer(req) if matches!(req.operation, TimerOperation::Start { .. })
    )));
}

#[test]
fn poll_failure_keeps_the_cadence() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");
    let mut record = IncidentRecord::from_offer(&offer("INC-1"), 0);
    record.phase = ResponderPhase::Rtb;
    model.active_incident = Some(record);

    let _ = app.update(Event::ClosureRequested, &mut model);
    let poll = model.closure_poll.clone().unwrap();

    let _ = app.update(
        Event::ClosurePollResponse {
            result: Box::new(Err(responder_core::AppError::new(
                responder_core::ErrorKind::Network,
                "gateway timeout",
            ))),
        },
        &mut model,
    );

    // The failure surfaces as a retryable error and polling continues.
    assert!(model.closure_poll.is_some());
    assert!(model.active_error.as_ref().unwrap().is_retryable());
    assert!(model.active_incident.is_some());

    // Next tick re-arms a fresh timer and fetches again.
    let update = app.update(
        Event::TimerElapsed(TimerOutput::Fired { id: poll.timer_id }),
        &mut model,
    );
    let new_poll = model.closure_poll.clone().unwrap();
    assert_ne!(new_poll.timer_id, poll.timer_id);
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));
}

#[test]
fn unfinished_poll_result_keeps_waiting() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");
    let mut record = IncidentRecord::from_offer(&offer("INC-1"), 0);
    record.phase = ResponderPhase::Rtb;
    model.active_incident = Some(record);

    let _ = app.update(Event::ClosureRequested, &mut model);
    let _ = app.update(
        Event::ClosurePollResponse {
            result: Box::new(Ok(incident_dto("INC-1", false))),
        },
        &mut model,
    );

    assert!(model.closure_poll.is_some());
    assert!(model.active_incident.is_some());
    assert!(!model.navigate_home);
}

#[test]
fn approved_closure_wipes_state_and_navigates_home() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");
    let mut record = IncidentRecord::from_offer(&offer("INC-1"), 0);
    record.phase = ResponderPhase::Rtb;
    model.active_incident = Some(record);
    model.forms.vitals = Some(VitalSigns::default());

    let _ = app.update(Event::ClosureRequested, &mut model);
    let update = app.update(
        Event::ClosurePollResponse {
            result: Box::new(Ok(incident_dto("INC-1", true))),
        },
        &mut model,
    );

    assert!(model.active_incident.is_none());
    assert!(model.forms.is_empty());
    assert!(model.closure_poll.is_none());
    assert!(model.navigate_home);

    // Both per-user snapshots are deleted and the poll timer is cancelled.
    let ops = storage_ops(&update.effects);
    let deleted: Vec<_> = ops
        .iter()
        .filter_map(|op| match op {
            StorageOperation::Delete { key } => Some(key.raw()),
            _ => None,
        })
        .collect();
    assert!(deleted.contains(&"incident:resp-1".to_string()));
    assert!(deleted.contains(&"forms:resp-1".to_string()));

    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Timer(req) if matches!(req.operation, TimerOperation::Cancel { .. })
    )));
}

#[test]
fn explicit_stop_cancels_the_poll_timer() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app, "resp-1");
    let mut record = IncidentRecord::from_offer(&offer("INC-1"), 0);
    record.phase = ResponderPhase::Rtb;
    model.active_incident = Some(record);

    let _ = app.update(Event::ClosureRequested, &mut model);
    let poll = model.closure_poll.clone().unwrap();

    let update = app.update(Event::ClosurePollStopped, &mut model);
    assert!(model.closure_poll.is_none());
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Timer(req) if matches!(req.operation, TimerOperation::Cancel { id } if id == poll.timer_id)
    )));

    // A tick from the cancelled timer is stale and fetches nothing.
    let update = app.update(
        Event::TimerElapsed(TimerOutput::Fired { id: poll.timer_id }),
        &mut model,
    );
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Http(_))));
}

#[test]
fn restored_record_after_login_survives_field_for_field() {
    let record = IncidentRecord::from_offer(&offer("INC-5"), 42);
    let bytes = serde_json::to_vec(&record).unwrap();

    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.session = Session::authenticated("jwt", UserId::new("resp-1"));

    let _ = app.update(
        Event::IncidentRestored {
            result: Box::new(Ok(StorageOutput::Value(Some(bytes)))),
        },
        &mut model,
    );

    assert_matches!(model.active_incident.as_ref(), Some(restored) => {
        assert_eq!(restored, &record);
    });
}
