use crate::api::{self, FacilityDto, IncidentDto};
use crate::capabilities::{
    AuthClaims, Capabilities, ConnectOptions, OutboundEvent, RealtimeOutput, StorageOperation,
    StorageOutput, StoreNamespace, StorageKey, TimerOutput,
};
use crate::{
    AppError, ClosurePoll, DispatcherId, ErrorKind, Event, FormBuffers, IncidentId, IncidentPatch,
    IncidentRecord, IncidentSummaryView, Model, OfferCard, OfferResolution, PendingStatusRequest,
    RequestId, ResponderPhase, RoomId, Session, StatusReport, ToastKind, UserId, ViewModel,
    get_current_time_ms, DESCRIPTION_PREVIEW_LENGTH,
};

const SESSION_KEY: &str = "current";

#[derive(Default)]
pub struct App;

impl App {
    // --- storage helpers ---

    fn session_key() -> Option<StorageKey> {
        match StorageKey::new(StoreNamespace::Session, SESSION_KEY) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(error = %e, "invalid session storage key");
                None
            }
        }
    }

    fn user_key(namespace: StoreNamespace, user_id: &UserId) -> Option<StorageKey> {
        match StorageKey::new(namespace, user_id.as_str()) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(error = %e, user = %user_id, "invalid per-user storage key");
                None
            }
        }
    }

    fn persist_session(model: &Model, caps: &Capabilities) {
        let Some(key) = Self::session_key() else {
            return;
        };
        match StorageOperation::set_json(key, &model.session) {
            Ok(op) => caps.storage.run(op, |result| Event::SnapshotPersisted {
                result: Box::new(result),
            }),
            Err(e) => tracing::error!(error = %e, "failed to serialize session"),
        }
    }

    fn persist_incident_record(model: &Model, caps: &Capabilities, record: &IncidentRecord) {
        let Some(user_id) = model.session.user_id() else {
            tracing::warn!("cannot persist incident without a user id");
            return;
        };
        let Some(key) = Self::user_key(StoreNamespace::Incident, user_id) else {
            return;
        };
        match StorageOperation::set_json(key, record) {
            Ok(op) => caps.storage.run(op, |result| Event::SnapshotPersisted {
                result: Box::new(result),
            }),
            Err(e) => tracing::error!(error = %e, "failed to serialize incident snapshot"),
        }
    }

    fn persist_forms(model: &Model, caps: &Capabilities) {
        let Some(user_id) = model.session.user_id() else {
            return;
        };
        let Some(key) = Self::user_key(StoreNamespace::Forms, user_id) else {
            return;
        };
        match StorageOperation::set_json(key, &model.forms) {
            Ok(op) => caps.storage.run(op, |result| Event::SnapshotPersisted {
                result: Box::new(result),
            }),
            Err(e) => tracing::error!(error = %e, "failed to serialize form buffers"),
        }
    }

    fn restore_user_state(model: &Model, caps: &Capabilities) {
        let Some(user_id) = model.session.user_id() else {
            return;
        };
        if let Some(key) = Self::user_key(StoreNamespace::Incident, user_id) {
            caps.storage.get(key, |result| Event::IncidentRestored {
                result: Box::new(result),
            });
        }
        if let Some(key) = Self::user_key(StoreNamespace::Forms, user_id) {
            caps.storage.get(key, |result| Event::FormsRestored {
                result: Box::new(result),
            });
        }
    }

    // --- connection manager ---

    /// Idempotent: afterwards there is exactly one connection when the user
    /// is authenticated and checked in, and none otherwise. Transport
    /// failures surface through the connectivity flag, never as an error to
    /// the caller.
    fn ensure_connection(model: &mut Model, caps: &Capabilities) {
        let user_id = match (model.presence.is_online(), model.session.user_id()) {
            (true, Some(user_id)) => user_id.clone(),
            _ => {
                Self::teardown_connection(model, caps);
                return;
            }
        };

        if model.connection.connected || model.connection.opening {
            return;
        }

        let options = ConnectOptions {
            url: model.config.realtime_url.clone(),
            auth: AuthClaims::responder(user_id),
            reconnect: model.config.reconnect,
        };

        model.connection.mark_opening();
        tracing::info!(url = %options.url, "opening dispatch connection");
        caps.realtime.open(options, |result| Event::TransportOpened {
            result: Box::new(result),
        });
    }

    /// Heartbeat stops before the transport goes away, and the absence
    /// announcement is fire-and-forget: losing it is tolerated.
    fn teardown_connection(model: &mut Model, caps: &Capabilities) {
        Self::stop_heartbeat(model, caps);

        if model.connection.connected {
            if let Some(user_id) = model.session.user_id() {
                caps.realtime.emit(OutboundEvent::PresenceAnnounce {
                    user_id: user_id.clone(),
                    online: false,
                });
            }
        }

        if model.connection.connected || model.connection.opening {
            tracing::info!("closing dispatch connection");
            caps.realtime.close();
        }

        model.connection = crate::ConnectionState::default();

        if model.pending_offer.take().is_some() {
            tracing::info!("pending offer voided by teardown");
        }
    }

    fn handle_connected(model: &mut Model, caps: &Capabilities) {
        // The responder may have checked out while the connect was in flight.
        if !model.presence.is_online() || model.session.user_id().is_none() {
            model.connection.mark_connected();
            Self::teardown_connection(model, caps);
            return;
        }

        model.connection.mark_connected();
        tracing::info!("dispatch connection established");

        if let Some(user_id) = model.session.user_id() {
            caps.realtime.emit(OutboundEvent::PresenceAnnounce {
                user_id: user_id.clone(),
                online: true,
            });
        }

        Self::start_heartbeat(model, caps);
    }

    fn handle_disconnected(model: &mut Model, caps: &Capabilities, reason: &str) {
        tracing::warn!(reason, "dispatch connection lost");
        Self::stop_heartbeat(model, caps);
        model.connection.mark_disconnected();

        // The server is the source of truth for unanswered offers; it will
        // re-offer or reassign.
        if let Some(offer) = model.pending_offer.take() {
            tracing::info!(incident = %offer.incident_id, "pending offer voided by disconnect");
        }
    }

    fn start_heartbeat(model: &mut Model, caps: &Capabilities) {
        Self::stop_heartbeat(model, caps);
        let id = model.next_timer_id();
        model.heartbeat_timer = Some(id);
        caps.timer
            .start(id, model.config.heartbeat_interval_ms, Event::TimerElapsed);
    }

    fn stop_heartbeat(model: &mut Model, caps: &Capabilities) {
        if let Some(id) = model.heartbeat_timer.take() {
            caps.timer.cancel(id);
        }
    }

    /// One heartbeat interval elapsed: ping and re-arm, but only while the
    /// connection is still open. No acknowledgement is awaited.
    fn heartbeat_tick(model: &mut Model, caps: &Capabilities) {
        if !model.connection.connected {
            model.heartbeat_timer = None;
            return;
        }

        if let Some(user_id) = model.session.user_id() {
            caps.realtime.emit(OutboundEvent::Heartbeat {
                user_id: user_id.clone(),
                timestamp_ms: get_current_time_ms(),
            });
        }

        let id = model.next_timer_id();
        model.heartbeat_timer = Some(id);
        caps.timer
            .start(id, model.config.heartbeat_interval_ms, Event::TimerElapsed);
    }

    // --- offers ---

    fn handle_offer(model: &mut Model, offer: crate::IncidentOffer) {
        if !model.connection.connected {
            tracing::warn!(incident = %offer.incident_id, "offer received while disconnected, ignoring");
            return;
        }

        if model.has_declined(&offer.incident_id) {
            tracing::info!(incident = %offer.incident_id, "offer suppressed, already declined by responder");
            return;
        }

        // Last-write-wins by policy: a newer offer replaces an unanswered one.
        if let Some(previous) = model.pending_offer.replace(offer) {
            tracing::warn!(replaced = %previous.incident_id, "new offer replaced unanswered offer");
        }
    }

    fn handle_offer_resolved_elsewhere(
        model: &mut Model,
        incident_id: &IncidentId,
        resolution: OfferResolution,
    ) {
        let matches = model
            .pending_offer
            .as_ref()
            .is_some_and(|offer| &offer.incident_id == incident_id);

        if !matches {
            tracing::debug!(incident = %incident_id, "resolution for an offer we no longer hold");
            return;
        }

        model.pending_offer = None;
        let message = match resolution {
            OfferResolution::AcceptedElsewhere => "Offer withdrawn: another unit took the call.",
            OfferResolution::Declined => "Offer withdrawn by dispatch.",
        };
        model.show_toast(message, ToastKind::Info);
    }

    /// Deliver the responder's decision, exactly once per offer. Fails fast
    /// without touching the network when the connection or identity is
    /// missing; the pending offer is cleared after the attempt either way.
    fn respond_to_offer(
        model: &mut Model,
        caps: &Capabilities,
        incident_id: &IncidentId,
        accepted: bool,
    ) {
        let Some(user_id) = model.session.user_id().cloned() else {
            model.set_error(AppError::new(
                ErrorKind::InvalidState,
                "cannot respond to an offer without a signed-in responder",
            ));
            model.show_toast("Couldn't send your response. Please sign in again.", ToastKind::Error);
            return;
        };

        if !model.connection.connected {
            model.set_error(AppError::new(
                ErrorKind::NotConnected,
                "cannot respond to an offer without a live dispatch connection",
            ));
            model.show_toast(
                "Couldn't send your response. Reconnecting to dispatch...",
                ToastKind::Error,
            );
            return;
        }

        let offer = model.pending_offer.take();
        let offer = offer.filter(|o| {
            if &o.incident_id == incident_id {
                true
            } else {
                tracing::warn!(
                    pending = %o.incident_id,
                    responding_to = %incident_id,
                    "decision targets a different incident than the pending offer"
                );
                false
            }
        });

        let dispatcher_id = offer
            .as_ref()
            .map_or_else(DispatcherId::unknown, |o| o.dispatcher_id.clone());

        caps.realtime.emit(OutboundEvent::OfferDecision {
            incident_id: incident_id.clone(),
            responder_id: user_id,
            dispatcher_id,
            accepted,
        });

        if accepted {
            // Join strictly after the decision event has been issued.
            caps.realtime.join_room(RoomId::for_incident(incident_id));

            if let Some(offer) = offer {
                let record = IncidentRecord::from_offer(&offer, get_current_time_ms());
                Self::publish_incident(model, caps, record);
            } else {
                // We accepted an offer whose snapshot we no longer hold;
                // recover the incident from the backend.
                Self::fetch_incident(model, caps, incident_id, |incident_id, result| {
                    Event::IncidentSyncResponse {
                        incident_id,
                        result: Box::new(result),
                    }
                });
            }
            model.show_toast("Assignment accepted. You are en route.", ToastKind::Success);
        } else {
            model.record_denied_offer(incident_id.clone());
        }
    }

    // --- incident record store ---

    /// Merge, persist, then publish as one logical step; nothing else reads
    /// or writes the record in between.
    fn update_incident(model: &mut Model, caps: &Capabilities, patch: &IncidentPatch) {
        let Some(current) = model.active_incident.clone() else {
            model.set_error(AppError::new(
                ErrorKind::InvalidState,
                "no active incident to update",
            ));
            return;
        };

        let mut merged = current;
        merged.apply(patch, get_current_time_ms());

        Self::persist_incident_record(model, caps, &merged);
        Self::sync_incident(model, caps, &merged.incident_id.clone(), patch);
        model.active_incident = Some(merged);
    }

    fn publish_incident(model: &mut Model, caps: &Capabilities, record: IncidentRecord) {
        Self::persist_incident_record(model, caps, &record);
        model.active_incident = Some(record);
    }

    // --- REST requests ---

    fn sync_incident(
        model: &Model,
        caps: &Capabilities,
        incident_id: &IncidentId,
        patch: &IncidentPatch,
    ) {
        let request = api::IncidentUpdateRequest::from_patch(patch);
        let body = match serde_json::to_vec(&request) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize incident update");
                return;
            }
        };

        let url = api::incident_url(&model.config.api_base_url, incident_id);
        let mut builder = caps.http.put(&url);
        builder = builder
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = model.session.token() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let incident_id = incident_id.clone();
        builder.send(move |result| Event::IncidentSyncResponse {
            incident_id: incident_id.clone(),
            result: Box::new(api::decode_json::<IncidentDto>(result)),
        });
    }

    fn fetch_incident<F>(model: &Model, caps: &Capabilities, incident_id: &IncidentId, make_event: F)
    where
        F: Fn(IncidentId, crate::AppResult<IncidentDto>) -> Event + Send + Sync + 'static,
    {
        let url = api::incident_url(&model.config.api_base_url, incident_id);
        let mut builder = caps.http.get(&url);
        if let Some(token) = model.session.token() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let incident_id = incident_id.clone();
        builder.send(move |result| {
            make_event(incident_id.clone(), api::decode_json::<IncidentDto>(result))
        });
    }

    fn request_facilities(model: &Model, caps: &Capabilities) {
        let emergency_type = model
            .active_incident
            .as_ref()
            .map(|record| record.emergency_type)
            .unwrap_or_default();

        let url = api::facilities_url(&model.config.api_base_url, emergency_type);
        let mut builder = caps.http.get(&url);
        if let Some(token) = model.session.token() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder.send(|result| {
            let result = api::decode_json::<api::FacilityListResponse>(result).map(|response| {
                response
                    .facilities
                    .into_iter()
                    .map(FacilityDto::to_domain)
                    .collect()
            });
            Event::FacilitiesResponse {
                result: Box::new(result),
            }
        });
    }

    fn request_responder_profile(model: &Model, caps: &Capabilities) {
        let Some(user_id) = model.session.user_id() else {
            return;
        };

        let url = api::responder_url(&model.config.api_base_url, user_id);
        let mut builder = caps.http.get(&url);
        if let Some(token) = model.session.token() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder.send(|result| {
            let result =
                api::decode_json::<api::ResponderDto>(result).map(api::ResponderDto::to_domain);
            Event::ResponderProfileResponse {
                result: Box::new(result),
            }
        });
    }

    fn request_active_incidents(model: &Model, caps: &Capabilities) {
        let Some(user_id) = model.session.user_id() else {
            return;
        };

        let url = api::active_incidents_url(&model.config.api_base_url, user_id);
        let mut builder = caps.http.get(&url);
        if let Some(token) = model.session.token() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder.send(|result| {
            let result = api::decode_json::<api::IncidentListResponse>(result)
                .map(|response| response.incidents);
            Event::ActiveIncidentsResponse {
                result: Box::new(result),
            }
        });
    }

    fn resolve_hospital(model: &Model, caps: &Capabilities, name: String, address: String) {
        let request = api::HospitalCreateRequest { name, address };
        let body = match serde_json::to_vec(&request) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize hospital request");
                return;
            }
        };

        let url = api::hospitals_url(&model.config.api_base_url);
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        let mut builder = caps.http.post(&url);
        builder = builder
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", idempotency_key)
            .body(body);
        if let Some(token) = model.session.token() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder.send(|result| {
            let result =
                api::decode_json::<api::FacilityDto>(result).map(api::FacilityDto::to_domain);
            Event::HospitalResolveResponse {
                result: Box::new(result),
            }
        });
    }

    // --- status requests (emit + ack with timeout) ---

    fn start_status_query(model: &mut Model, caps: &Capabilities, incident_id: IncidentId) {
        if !model.connection.connected || !model.is_authenticated() {
            model.last_status_report = Some(Err(AppError::new(
                ErrorKind::NotConnected,
                "status request requires a live authenticated connection",
            )));
            return;
        }

        let request_id = RequestId::generate();
        let timer_id = model.next_timer_id();

        model.status_requests.insert(
            request_id.clone(),
            PendingStatusRequest {
                incident_id: incident_id.clone(),
                timer_id,
                requested_at_ms: get_current_time_ms(),
            },
        );

        caps.timer
            .start(timer_id, model.config.ack_timeout_ms, Event::TimerElapsed);

        let callback_id = request_id.clone();
        caps.realtime.emit_with_ack(
            request_id,
            OutboundEvent::StatusQuery { incident_id },
            move |result| Event::AckReceived {
                request_id: callback_id.clone(),
                result: Box::new(result),
            },
        );
    }

    /// Ack side of the race. Removing the map entry is what makes the two
    /// outcomes mutually exclusive: a request that already timed out finds
    /// nothing here and the ack becomes a no-op.
    fn handle_ack(model: &mut Model, caps: &Capabilities, request_id: &RequestId, result: crate::capabilities::RealtimeResult) {
        let Some(pending) = model.status_requests.remove(request_id) else {
            tracing::debug!(request = %request_id, "late ack ignored");
            return;
        };

        caps.timer.cancel(pending.timer_id);

        let report = match result {
            Ok(RealtimeOutput::Ack { payload, .. }) => {
                if payload.success {
                    payload
                        .data
                        .ok_or_else(|| {
                            AppError::new(ErrorKind::Deserialization, "acknowledgement carried no data")
                        })
                        .and_then(|data| {
                            serde_json::from_value::<StatusReport>(data).map_err(|e| {
                                AppError::new(ErrorKind::Deserialization, e.to_string())
                            })
                        })
                } else {
                    Err(AppError::new(
                        ErrorKind::Unknown,
                        payload
                            .error
                            .unwrap_or_else(|| "status request failed".to_string()),
                    ))
                }
            }
            Ok(other) => Err(AppError::new(
                ErrorKind::Transport,
                format!("unexpected transport output: {other:?}"),
            )),
            Err(e) => Err(AppError::from(e)),
        };

        model.last_status_report = Some(report);
    }

    /// Timeout side of the race; any ack arriving later is ignored.
    fn status_request_timed_out(model: &mut Model, request_id: &RequestId) {
        let Some(pending) = model.status_requests.remove(request_id) else {
            return;
        };

        tracing::warn!(
            request = %request_id,
            incident = %pending.incident_id,
            "status request timed out"
        );
        model.last_status_report = Some(Err(AppError::new(
            ErrorKind::Timeout,
            "dispatch did not acknowledge the status request in time",
        )
        .with_context("incident_id", pending.incident_id.as_str())));
    }

    // --- closure approval polling ---

    /// Fixed-interval polling, deliberately without backoff: the window is
    /// short-lived and human-supervised.
    fn start_closure_poll(model: &mut Model, caps: &Capabilities, incident_id: IncidentId) {
        if model
            .closure_poll
            .as_ref()
            .is_some_and(|poll| poll.incident_id == incident_id)
        {
            return;
        }

        Self::stop_closure_poll(model, caps);

        Self::fetch_incident(model, caps, &incident_id, |_, result| {
            Event::ClosurePollResponse {
                result: Box::new(result),
            }
        });

        let timer_id = model.next_timer_id();
        model.closure_poll = Some(ClosurePoll {
            incident_id,
            timer_id,
        });
        caps.timer.start(
            timer_id,
            model.config.closure_poll_interval_ms,
            Event::TimerElapsed,
        );
    }

    fn stop_closure_poll(model: &mut Model, caps: &Capabilities) {
        if let Some(poll) = model.closure_poll.take() {
            caps.timer.cancel(poll.timer_id);
        }
    }

    fn closure_poll_tick(model: &mut Model, caps: &Capabilities) {
        let Some(poll) = model.closure_poll.as_ref() else {
            return;
        };
        let incident_id = poll.incident_id.clone();

        // Re-arm first so the cadence survives a failed fetch.
        let timer_id = model.next_timer_id();
        model.closure_poll = Some(ClosurePoll {
            incident_id: incident_id.clone(),
            timer_id,
        });
        caps.timer.start(
            timer_id,
            model.config.closure_poll_interval_ms,
            Event::TimerElapsed,
        );

        Self::fetch_incident(model, caps, &incident_id, |_, result| {
            Event::ClosurePollResponse {
                result: Box::new(result),
            }
        });
    }

    fn handle_closure_poll_response(
        model: &mut Model,
        caps: &Capabilities,
        result: crate::AppResult<IncidentDto>,
    ) {
        if model.closure_poll.is_none() {
            return;
        }

        match result {
            Ok(dto) if dto.is_finished => Self::finish_incident(model, caps),
            Ok(dto) => {
                tracing::debug!(incident = %dto.id, status = %dto.status, "closure not yet approved");
            }
            Err(e) => {
                tracing::warn!(error = %e, "closure poll failed, keeping cadence");
                model.set_error(
                    AppError::new(ErrorKind::Network, "couldn't check closure status")
                        .with_context("source", e.message),
                );
            }
        }
    }

    /// Terminal cleanup: the record and its buffered form data are destroyed
    /// together, in memory and in durable storage.
    fn finish_incident(model: &mut Model, caps: &Capabilities) {
        Self::stop_closure_poll(model, caps);

        let Some(record) = model.active_incident.take() else {
            return;
        };

        if model.connection.connected {
            caps.realtime
                .leave_room(RoomId::for_incident(&record.incident_id));
        }

        model.forms = FormBuffers::default();

        if let Some(user_id) = model.session.user_id() {
            if let Some(key) = Self::user_key(StoreNamespace::Incident, user_id) {
                caps.storage.delete(key, |result| Event::SnapshotPersisted {
                    result: Box::new(result),
                });
            }
            if let Some(key) = Self::user_key(StoreNamespace::Forms, user_id) {
                caps.storage.delete(key, |result| Event::SnapshotPersisted {
                    result: Box::new(result),
                });
            }
        }

        tracing::info!(incident = %record.incident_id, "incident closed");
        model.navigate_home = true;
        model.show_toast("Incident closed.", ToastKind::Success);
    }

    // --- timers ---

    fn handle_timer(model: &mut Model, caps: &Capabilities, output: TimerOutput) {
        match output {
            TimerOutput::Cancelled { id } => {
                tracing::debug!(timer = %id, "timer cancelled");
            }
            TimerOutput::Fired { id } => {
                if model.heartbeat_timer == Some(id) {
                    Self::heartbeat_tick(model, caps);
                } else if let Some(request_id) = model.status_request_for_timer(id) {
                    Self::status_request_timed_out(model, &request_id);
                } else if model
                    .closure_poll
                    .as_ref()
                    .is_some_and(|poll| poll.timer_id == id)
                {
                    Self::closure_poll_tick(model, caps);
                } else {
                    tracing::debug!(timer = %id, "stale timer fired, ignoring");
                }
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        tracing::debug!(event = event.name(), "update");

        match event {
            Event::AppStarted { config } => {
                match config.validate() {
                    Ok(()) => model.config = *config,
                    Err(e) => {
                        tracing::error!(error = %e, "invalid startup configuration, keeping defaults");
                        model.set_error(e.into());
                    }
                }
                if let Some(key) = Self::session_key() {
                    caps.storage.get(key, |result| Event::SessionRestored {
                        result: Box::new(result),
                    });
                }
            }

            Event::SessionRestored { result } => {
                match StorageOutput::decode_or_none::<Session>(*result) {
                    Some(session) if session.is_authenticated() => {
                        model.session = session;
                        Self::restore_user_state(model, caps);
                        Self::request_responder_profile(model, caps);
                        Self::request_active_incidents(model, caps);
                    }
                    _ => {
                        model.session = Session::anonymous();
                    }
                }
            }

            Event::LoginCompleted { token, user_id } => {
                model.session = Session::authenticated(token, UserId::new(user_id));
                Self::persist_session(model, caps);
                Self::restore_user_state(model, caps);
                Self::request_responder_profile(model, caps);
                Self::request_active_incidents(model, caps);
                Self::ensure_connection(model, caps);
            }

            Event::LogoutRequested => {
                Self::teardown_connection(model, caps);
                Self::stop_closure_poll(model, caps);
                model.session = Session::anonymous();
                model.presence.check_out();
                model.active_incident = None;
                model.forms = FormBuffers::default();
                model.responder_profile = None;
                model.status_requests.clear();
                model.last_status_report = None;
                if let Some(key) = Self::session_key() {
                    caps.storage.delete(key, |result| Event::SnapshotPersisted {
                        result: Box::new(result),
                    });
                }
            }

            Event::CheckInRequested => {
                model.presence.check_in();
                Self::ensure_connection(model, caps);
            }

            Event::CheckOutRequested => {
                model.presence.check_out();
                Self::ensure_connection(model, caps);
            }

            Event::TransportOpened { result } => match *result {
                Ok(RealtimeOutput::Opened) => Self::handle_connected(model, caps),
                Ok(other) => {
                    tracing::warn!(?other, "unexpected open result");
                    model.connection.mark_disconnected();
                }
                Err(e) => {
                    tracing::error!(error = %e, "dispatch connect failed");
                    model.connection.mark_disconnected();
                }
            },

            Event::TransportDisconnected { reason } => {
                Self::handle_disconnected(model, caps, &reason);
            }

            Event::TransportReconnecting { attempt } => {
                tracing::info!(attempt, "transport retrying");
                model.connection.observe_reconnect_attempt(attempt);
            }

            Event::TransportReconnected => {
                Self::handle_connected(model, caps);
            }

            Event::TransportReconnectExhausted => {
                tracing::warn!("transport gave up reconnecting");
                Self::stop_heartbeat(model, caps);
                model.connection.mark_disconnected();
                model.connection.reconnect_attempts = 0;
            }

            Event::OfferReceived(offer) => {
                Self::handle_offer(model, *offer);
            }

            Event::OfferResolvedElsewhere {
                incident_id,
                resolution,
            } => {
                Self::handle_offer_resolved_elsewhere(model, &incident_id, resolution);
            }

            Event::OfferResponseRequested {
                incident_id,
                accepted,
            } => {
                Self::respond_to_offer(model, caps, &incident_id, accepted);
            }

            Event::ClearDeniedOffers => {
                model.denied_offers.clear();
            }

            Event::TimerElapsed(output) => {
                Self::handle_timer(model, caps, output);
            }

            Event::StatusQueryRequested { incident_id } => {
                Self::start_status_query(model, caps, incident_id);
            }

            Event::AckReceived { request_id, result } => {
                Self::handle_ack(model, caps, &request_id, *result);
            }

            Event::IncidentPhaseRequested { phase } => {
                let current = model.active_incident.as_ref().map(|record| record.phase);
                match current {
                    Some(from) => match from.validate_transition(phase) {
                        Ok(()) => Self::update_incident(model, caps, &IncidentPatch::phase(phase)),
                        Err(e) => model.set_error(e.into()),
                    },
                    None => model.set_error(AppError::new(
                        ErrorKind::InvalidState,
                        "no active incident to update",
                    )),
                }
            }

            Event::FacilitySelected(facility) => {
                Self::update_incident(model, caps, &IncidentPatch::facility(*facility));
            }

            Event::VitalsUpdated(vitals) => {
                model.forms.vitals = Some(*vitals);
                Self::persist_forms(model, caps);
            }

            Event::PatientDetailsUpdated(patient) => {
                model.forms.patient = Some(*patient);
                Self::persist_forms(model, caps);
            }

            Event::IncidentSyncResponse {
                incident_id,
                result,
            } => match *result {
                Ok(dto) => {
                    tracing::debug!(incident = %dto.id, "incident update accepted by backend");
                    // A decision made without a local snapshot comes back here.
                    if model.active_incident.is_none() && !dto.is_finished {
                        match dto.to_record(get_current_time_ms()) {
                            Ok(record) => Self::publish_incident(model, caps, record),
                            Err(e) => tracing::warn!(error = %e, "server incident was unusable"),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(incident = %incident_id, error = %e, "incident update failed");
                    model.set_error(e);
                }
            },

            Event::IncidentRestored { result } => {
                if let Some(record) = StorageOutput::decode_or_none::<IncidentRecord>(*result) {
                    if model.active_incident.is_none() {
                        tracing::info!(incident = %record.incident_id, "restored incident from storage");
                        model.active_incident = Some(record);
                    }
                }
            }

            Event::FormsRestored { result } => {
                if let Some(forms) = StorageOutput::decode_or_none::<FormBuffers>(*result) {
                    model.forms = forms;
                }
            }

            Event::FacilitiesRequested => {
                Self::request_facilities(model, caps);
            }

            Event::FacilitiesResponse { result } => match *result {
                Ok(facilities) => {
                    model.facilities = facilities;
                    model.clear_error();
                }
                Err(e) => {
                    // List views degrade to an empty state with a retry affordance.
                    model.facilities = Vec::new();
                    model.set_error(e);
                }
            },

            Event::ResponderProfileRequested => {
                Self::request_responder_profile(model, caps);
            }

            Event::ResponderProfileResponse { result } => match *result {
                Ok(profile) => model.responder_profile = Some(profile),
                Err(e) => {
                    tracing::warn!(error = %e, "responder profile fetch failed");
                    model.set_error(e);
                }
            },

            Event::HospitalResolveRequested { name, address } => {
                Self::resolve_hospital(model, caps, name, address);
            }

            Event::HospitalResolveResponse { result } => match *result {
                Ok(facility) => {
                    if !model.facilities.contains(&facility) {
                        model.facilities.push(facility.clone());
                    }
                    Self::update_incident(model, caps, &IncidentPatch::facility(facility));
                }
                Err(e) => {
                    model.show_toast("Couldn't save the hospital. Try again.", ToastKind::Error);
                    model.set_error(e);
                }
            },

            Event::ActiveIncidentsRequested => {
                Self::request_active_incidents(model, caps);
            }

            Event::ActiveIncidentsResponse { result } => match *result {
                Ok(incidents) => {
                    if model.active_incident.is_none() {
                        if let Some(dto) = incidents.iter().find(|dto| !dto.is_finished) {
                            match dto.to_record(get_current_time_ms()) {
                                Ok(record) => {
                                    tracing::info!(incident = %record.incident_id, "recovered active incident from backend");
                                    Self::publish_incident(model, caps, record);
                                }
                                Err(e) => tracing::warn!(error = %e, "active incident was unusable"),
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "active incident recovery failed");
                }
            },

            Event::ClosureRequested => {
                let incident_id = model
                    .active_incident
                    .as_ref()
                    .map(|record| record.incident_id.clone());
                match incident_id {
                    Some(incident_id) => {
                        Self::update_incident(
                            model,
                            caps,
                            &IncidentPatch {
                                closure_requested: Some(true),
                                ..IncidentPatch::default()
                            },
                        );
                        Self::start_closure_poll(model, caps, incident_id);
                    }
                    None => model.set_error(AppError::new(
                        ErrorKind::InvalidState,
                        "no active incident to close",
                    )),
                }
            }

            Event::ClosurePollStarted { incident_id } => {
                Self::start_closure_poll(model, caps, incident_id);
            }

            Event::ClosurePollStopped => {
                Self::stop_closure_poll(model, caps);
            }

            Event::ClosurePollResponse { result } => {
                Self::handle_closure_poll_response(model, caps, *result);
            }

            Event::SnapshotPersisted { result } => {
                if let Err(e) = *result {
                    tracing::warn!(error = %e, "durable write failed, continuing");
                }
            }

            Event::DismissError => model.clear_error(),
            Event::DismissToast => model.toast = None,
            Event::NavigationConsumed => model.navigate_home = false,
        }

        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        let pending_offer = model.pending_offer.as_ref().map(|offer| OfferCard {
            incident_id: offer.incident_id.as_str().to_string(),
            emergency_type: offer.incident.emergency_type,
            description_preview: offer.incident.description_preview(DESCRIPTION_PREVIEW_LENGTH),
            address: offer.incident.location.address.clone(),
            landmark: offer.incident.location.landmark.clone(),
        });

        let incident = model.active_incident.as_ref().map(|record| {
            let transitions = record.phase.valid_transitions();
            let transitions = if record.emergency_type.uses_facility() {
                transitions
            } else {
                transitions
                    .into_iter()
                    .filter(|phase| *phase != ResponderPhase::AtFacility)
                    .collect()
            };

            IncidentSummaryView {
                incident_id: record.incident_id.as_str().to_string(),
                emergency_type: record.emergency_type,
                phase: record.phase,
                phase_label: record.phase.display_name().to_string(),
                available_transitions: transitions,
                facility_name: record
                    .selected_facility
                    .as_ref()
                    .map(|facility| facility.name.clone()),
                dispatcher_name: record.dispatcher.name.clone(),
                dispatcher_phone: record.dispatcher.phone.clone(),
                closure_requested: record.closure_requested,
            }
        });

        ViewModel {
            banner: model.connection_banner(),
            online: model.presence.is_online(),
            authenticated: model.is_authenticated(),
            pending_offer,
            incident,
            awaiting_closure: model.closure_poll.is_some(),
            facilities: model.facilities.clone(),
            error_message: model
                .active_error
                .as_ref()
                .map(AppError::user_facing_message),
            error_is_retryable: model
                .active_error
                .as_ref()
                .is_some_and(AppError::is_retryable),
            toast: model.toast.clone(),
            navigate_home: model.navigate_home,
            status_report: model.last_status_report.clone(),
        }
    }
}
