use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    DispatcherId, IncidentId, RequestId, RoomId, UserId, RECONNECT_MAX_ATTEMPTS,
    RECONNECT_MAX_DELAY_MS, RECONNECT_MIN_DELAY_MS, RESPONDER_ROLE,
};

/// Retry configuration handed to the transport's built-in reconnection
/// engine. The core never schedules reconnect attempts itself; it only
/// supplies these bounds and observes attempt events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            min_delay_ms: RECONNECT_MIN_DELAY_MS,
            max_delay_ms: RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.max_attempts == 0 {
            return Err(RealtimeError::InvalidConfig {
                reason: "reconnect policy needs at least one attempt".to_string(),
            });
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(RealtimeError::InvalidConfig {
                reason: format!(
                    "reconnect min delay {}ms exceeds max delay {}ms",
                    self.min_delay_ms, self.max_delay_ms
                ),
            });
        }
        Ok(())
    }
}

/// Identity presented to the dispatch server when the connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaims {
    pub user_id: UserId,
    pub role: String,
}

impl AuthClaims {
    #[must_use]
    pub fn responder(user_id: UserId) -> Self {
        Self {
            user_id,
            role: RESPONDER_ROLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub url: String,
    pub auth: AuthClaims,
    pub reconnect: ReconnectPolicy,
}

/// Everything the core ever sends over the live connection. Heartbeats and
/// presence announcements are fire-and-forget liveness signals; the status
/// query is the one message that expects an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundEvent {
    Heartbeat {
        user_id: UserId,
        timestamp_ms: u64,
    },
    PresenceAnnounce {
        user_id: UserId,
        online: bool,
    },
    OfferDecision {
        incident_id: IncidentId,
        responder_id: UserId,
        dispatcher_id: DispatcherId,
        accepted: bool,
    },
    StatusQuery {
        incident_id: IncidentId,
    },
}

impl OutboundEvent {
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "responder:heartbeat",
            Self::PresenceAnnounce { .. } => "responder:presence",
            Self::OfferDecision { .. } => "offer:respond",
            Self::StatusQuery { .. } => "incident:status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum RealtimeOperation {
    /// Establish the single live connection. Resolved with `Opened` once the
    /// transport has authenticated, or an error if the connect fails.
    Open(Box<ConnectOptions>),
    /// Close the connection. Idempotent; closing a closed transport is a
    /// no-op for the shell.
    Close,
    /// Fire-and-forget send. No delivery guarantee, no result.
    Emit(OutboundEvent),
    /// Send expecting exactly one acknowledgement, resolved with `Ack` when
    /// the server answers. The core races this against its own timer.
    EmitWithAck {
        request_id: RequestId,
        event: OutboundEvent,
    },
    JoinRoom { room: RoomId },
    LeaveRoom { room: RoomId },
}

/// Acknowledgement body as reported by the dispatch server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeOutput {
    Opened,
    Closed,
    Ack {
        request_id: RequestId,
        payload: AckPayload,
    },
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("no open connection")]
    NotConnected,

    #[error("connect failed: {reason}")]
    ConnectFailed {
        reason: String,
        #[serde(default)]
        is_retryable: bool,
    },

    #[error("authentication rejected: {reason}")]
    AuthRejected { reason: String },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[serde(default)]
        is_retryable: bool,
    },

    #[error("invalid connection config: {reason}")]
    InvalidConfig { reason: String },
}

impl RealtimeError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectFailed { is_retryable, .. } | Self::Transport { is_retryable, .. } => {
                *is_retryable
            }
            Self::NotConnected => true,
            Self::AuthRejected { .. } | Self::InvalidConfig { .. } => false,
        }
    }

    #[must_use]
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
            is_retryable: true,
        }
    }
}

#[must_use = "realtime operation results must be handled"]
pub type RealtimeResult = Result<RealtimeOutput, RealtimeError>;

impl Operation for RealtimeOperation {
    type Output = RealtimeResult;
}

pub struct Realtime<Ev> {
    context: CapabilityContext<RealtimeOperation, Ev>,
}

impl<Ev> Clone for Realtime<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Realtime<Ev> {
    type Operation = RealtimeOperation;
    type MappedSelf<MappedEv> = Realtime<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Realtime::new(self.context.map_event(f))
    }
}

impl<Ev> Realtime<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<RealtimeOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn open<F>(&self, options: ConnectOptions, make_event: F)
    where
        F: Fn(RealtimeResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(RealtimeOperation::Open(Box::new(options)))
                .await;
            context.update_app(make_event(result));
        });
    }

    pub fn close(&self) {
        self.notify(RealtimeOperation::Close);
    }

    pub fn emit(&self, event: OutboundEvent) {
        self.notify(RealtimeOperation::Emit(event));
    }

    pub fn emit_with_ack<F>(&self, request_id: RequestId, event: OutboundEvent, make_event: F)
    where
        F: Fn(RealtimeResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(RealtimeOperation::EmitWithAck { request_id, event })
                .await;
            context.update_app(make_event(result));
        });
    }

    pub fn join_room(&self, room: RoomId) {
        self.notify(RealtimeOperation::JoinRoom { room });
    }

    pub fn leave_room(&self, room: RoomId) {
        self.notify(RealtimeOperation::LeaveRoom { room });
    }

    fn notify(&self, operation: RealtimeOperation) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(operation).await;
        });
    }
}
