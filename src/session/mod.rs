//! Realtime session management
//!
//! A `SessionLoop` owns one connection: it streams captured audio upstream,
//! dispatches inbound events to the status stream and tears both down
//! together. The `SessionSupervisor` runs loops back to back, with backoff,
//! for as long as a session is wanted.

mod config;
mod dispatch;
mod flag;
mod session;
mod stats;
mod supervisor;

pub use config::{AudioFormat, Modality, SessionConfig, VadConfig, VadMode};
pub use dispatch::{
    DispatchAction, EventDispatcher, PROCESSING_QUERY, RESPONSE_END_MARKER,
    RESPONSE_START_MARKER, SPEECH_DETECTED,
};
pub use flag::RunFlag;
pub use session::{Collaborators, SessionLoop, SessionState};
pub use stats::SessionStats;
pub use supervisor::SessionSupervisor;
