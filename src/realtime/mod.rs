//! Realtime backend connection: wire codec, transport and the REST key check

pub mod codec;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use codec::{InboundEvent, OutboundMessage};
pub use rest::check_api_key;
pub use transport::{establish, Connection, RealtimeReceiver, RealtimeSender, Transport};
pub use websocket::WebSocketTransport;
