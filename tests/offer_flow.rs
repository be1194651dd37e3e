use assert_matches::assert_matches;
use crux_core::testing::AppTester;

use responder_core::capabilities::{OutboundEvent, RealtimeOperation, RealtimeOutput};
use responder_core::{
    App, DispatcherId, Effect, EmergencyType, ErrorKind, Event, GeoPoint, IncidentId,
    IncidentLocation, IncidentOffer, IncidentSnapshot, Model, OfferResolution, ResponderPhase,
    Session, UserId,
};

fn offer(incident_id: &str, dispatcher_id: &str) -> IncidentOffer {
    IncidentOffer {
        incident_id: IncidentId::new(incident_id),
        dispatcher_id: DispatcherId::new(dispatcher_id),
        incident: IncidentSnapshot {
            incident_id: IncidentId::new(incident_id),
            emergency_type: EmergencyType::Medical,
            location: IncidentLocation {
                point: GeoPoint::new(14.6, 121.0).unwrap(),
                address: Some("EDSA corner Shaw".into()),
                landmark: Some("fuel station".into()),
            },
            description: Some("multi-vehicle collision".into()),
            reported_at_ms: 10,
        },
        received_at_ms: 10,
    }
}

fn realtime_ops(effects: &[Effect]) -> Vec<RealtimeOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Realtime(req) => Some(req.operation.clone()),
            _ => None,
        })
        .collect()
}

fn connected_model(app: &AppTester<App, Effect>) -> Model {
    let mut model = Model::default();
    model.session = Session::authenticated("jwt", UserId::new("resp-1"));
    let _ = app.update(Event::CheckInRequested, &mut model);
    let _ = app.update(
        Event::TransportOpened {
            result: Box::new(Ok(RealtimeOutput::Opened)),
        },
        &mut model,
    );
    model
}

#[test]
fn second_offer_replaces_the_first() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app);

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-1", "disp-1"))), &mut model);
    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-2", "disp-2"))), &mut model);

    let pending = model.pending_offer.as_ref().unwrap();
    assert_eq!(pending.incident_id.as_str(), "INC-2");
}

#[test]
fn accepting_acts_on_the_most_recent_offer() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app);

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-1", "disp-1"))), &mut model);
    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-2", "disp-2"))), &mut model);

    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-2"),
            accepted: true,
        },
        &mut model,
    );

    let ops = realtime_ops(&update.effects);
    assert_matches!(
        ops.iter().find(|op| matches!(op, RealtimeOperation::Emit(OutboundEvent::OfferDecision { .. }))),
        Some(RealtimeOperation::Emit(OutboundEvent::OfferDecision {
            incident_id,
            dispatcher_id,
            accepted: true,
            ..
        })) => {
            assert_eq!(incident_id.as_str(), "INC-2");
            assert_eq!(dispatcher_id.as_str(), "disp-2");
        }
    );

    let record = model.active_incident.as_ref().unwrap();
    assert_eq!(record.incident_id.as_str(), "INC-2");
}

#[test]
fn accept_sends_decision_then_joins_room_and_clears_pending() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app);

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-1", "disp-1"))), &mut model);
    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-1"),
            accepted: true,
        },
        &mut model,
    );

    let ops = realtime_ops(&update.effects);
    let decision_pos = ops
        .iter()
        .position(|op| matches!(op, RealtimeOperation::Emit(OutboundEvent::OfferDecision { .. })))
        .expect("decision event must be sent");
    let join_pos = ops
        .iter()
        .position(|op| matches!(op, RealtimeOperation::JoinRoom { .. }))
        .expect("join-room event must be sent");
    assert!(decision_pos < join_pos, "join must follow the decision");

    assert_matches!(&ops[join_pos], RealtimeOperation::JoinRoom { room } => {
        assert_eq!(room.as_str(), "incident:INC-1");
    });

    assert!(model.pending_offer.is_none());
    assert!(model.active_error.is_none());

    let record = model.active_incident.as_ref().unwrap();
    assert_eq!(record.phase, ResponderPhase::Enroute);
    assert_eq!(record.dispatcher.dispatcher_id.as_str(), "disp-1");

    // Accepting also persists the record for this user.
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Storage(_))));
}

#[test]
fn decline_clears_pending_and_records_denial() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app);

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-1", "disp-1"))), &mut model);
    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-1"),
            accepted: false,
        },
        &mut model,
    );

    let ops = realtime_ops(&update.effects);
    assert!(ops.iter().any(|op| matches!(
        op,
        RealtimeOperation::Emit(OutboundEvent::OfferDecision { accepted: false, .. })
    )));
    assert!(!ops.iter().any(|op| matches!(op, RealtimeOperation::JoinRoom { .. })));

    assert!(model.pending_offer.is_none());
    assert!(model.active_incident.is_none());
    assert!(model.has_declined(&IncidentId::new("INC-1")));
}

#[test]
fn respond_without_connection_rejects_without_any_network_call() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.session = Session::authenticated("jwt", UserId::new("resp-1"));
    model.presence.check_in();

    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-1"),
            accepted: true,
        },
        &mut model,
    );

    assert!(realtime_ops(&update.effects).is_empty());
    let error = model.active_error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::NotConnected);
    assert!(model.toast.is_some());
}

#[test]
fn respond_without_user_rejects_without_any_network_call() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::OfferResponseRequested {
            incident_id: IncidentId::new("INC-1"),
            accepted: false,
        },
        &mut model,
    );

    assert!(realtime_ops(&update.effects).is_empty());
    assert!(model.active_error.is_some());
}

#[test]
fn offer_resolved_elsewhere_clears_pending_without_reply() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app);

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-1", "disp-1"))), &mut model);
    let update = app.update(
        Event::OfferResolvedElsewhere {
            incident_id: IncidentId::new("INC-1"),
            resolution: OfferResolution::AcceptedElsewhere,
        },
        &mut model,
    );

    assert!(model.pending_offer.is_none());
    assert!(realtime_ops(&update.effects).is_empty());
    assert!(model.toast.is_some());
}

#[test]
fn resolution_for_a_different_incident_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = connected_model(&app);

    let _ = app.update(Event::OfferReceived(Box::new(offer("INC-2", "disp-1"))), &mut model);
    let _ = app.update(
        Event::OfferResolvedElsewhere {
            incident_id: IncidentId::new("INC-1"),
            resolution: OfferResolution::Declined,
        },
        &mut model,
    );

    assert!(model.pending_offer.is_some());
}
