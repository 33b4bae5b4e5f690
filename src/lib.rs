pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod realtime;
pub mod session;
pub mod status;

pub use audio::{AudioFile, AudioSource, DeviceInfo, InputStream, StreamParams, WavFileSource};
#[cfg(feature = "cpal")]
pub use audio::CpalAudioSource;
pub use config::{Config, ConfigProvider, EndpointParams, EnvConfigProvider};
pub use control::BridgeController;
pub use error::{BridgeError, ConnectFailure};
pub use http::{create_router, AppState};
pub use realtime::{
    check_api_key, Connection, InboundEvent, OutboundMessage, RealtimeReceiver, RealtimeSender, Transport,
    WebSocketTransport,
};
pub use session::{
    Collaborators, SessionConfig, SessionLoop, SessionStats, SessionSupervisor,
};
pub use status::{StatusReceiver, StatusSink};
