mod realtime;
mod storage;
mod timer;

pub use self::realtime::{
    AckPayload, AuthClaims, ConnectOptions, OutboundEvent, Realtime, RealtimeError,
    RealtimeOperation, RealtimeOutput, RealtimeResult, ReconnectPolicy,
};
pub use self::storage::{
    Storage, StorageError, StorageKey, StorageOperation, StorageOutput, StorageResult,
    StoreNamespace,
};
pub use self::timer::{Timer, TimerId, TimerOperation, TimerOutput};

// Render is Crux's built-in capability; it already provides everything needed
// for triggering view updates. Http comes straight from crux_http.
pub use crux_core::render::Render;
pub use crux_http::Http;

use crate::{App, Event};

pub type AppHttp = Http<Event>;
pub type AppRender = Render<Event>;
pub type AppRealtime = Realtime<Event>;
pub type AppStorage = Storage<Event>;
pub type AppTimer = Timer<Event>;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub storage: Storage<Event>,
    pub realtime: Realtime<Event>,
    pub timer: Timer<Event>,
}
