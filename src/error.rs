use thiserror::Error;

/// Why a connection attempt failed before the session became active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// DNS, TCP or other socket-level failure
    Network,
    /// TLS negotiation or certificate rejection
    Tls,
    /// Backend rejected the credentials (HTTP 401/403)
    Authentication,
    /// Any other handshake failure
    Handshake,
}

impl ConnectFailure {
    /// Human-readable hint appended to the status stream after a failed connect
    pub fn hint(&self) -> &'static str {
        match self {
            ConnectFailure::Network => {
                "This appears to be a connection issue. Check your internet connection."
            }
            ConnectFailure::Tls => {
                "This may be an SSL certificate issue. Check your network connection or the transport.verify_tls setting."
            }
            ConnectFailure::Authentication => {
                "This appears to be an authentication issue. Verify your OpenAI API key."
            }
            ConnectFailure::Handshake => "The realtime endpoint refused the WebSocket handshake.",
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or invalid credentials/settings. Fatal to a start attempt.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connect failed: {message}")]
    Connect {
        kind: ConnectFailure,
        message: String,
    },

    /// Local or remote closure of an established connection
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio read error: {0}")]
    AudioRead(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// A finite input (a non-looping WAV file) has no more frames
    #[error("audio input exhausted")]
    InputExhausted,
}

impl BridgeError {
    pub fn connect(kind: ConnectFailure, message: impl Into<String>) -> Self {
        BridgeError::Connect {
            kind,
            message: message.into(),
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, BridgeError::ConnectionClosed(_))
    }

    /// Optional follow-up line for the status stream
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            BridgeError::Connect { kind, .. } => Some(kind.hint()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_closed_is_distinct_from_transport() {
        assert!(BridgeError::ConnectionClosed("bye".into()).is_connection_closed());
        assert!(!BridgeError::Transport("reset".into()).is_connection_closed());
    }

    #[test]
    fn test_only_connect_errors_carry_hints() {
        let err = BridgeError::connect(ConnectFailure::Authentication, "401");
        assert!(err.hint().unwrap().contains("API key"));
        assert!(BridgeError::AudioRead("overflow".into()).hint().is_none());
    }
}
