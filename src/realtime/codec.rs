//! Wire encoding for the realtime event protocol
//!
//! Outbound messages are serialized from a tagged enum. Inbound payloads are
//! decoded leniently: anything this bridge does not act on, including payloads
//! that are not valid JSON, becomes [`InboundEvent::Other`] so newer server
//! events never break a session.

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;
use crate::session::SessionConfig;

/// Client → server messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16LE bytes
        audio: String,
    },
}

impl OutboundMessage {
    pub fn audio_append(pcm: &[u8]) -> Self {
        OutboundMessage::InputAudioBufferAppend {
            audio: base64::engine::general_purpose::STANDARD.encode(pcm),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::SessionUpdate { .. } => "session.update",
            OutboundMessage::ResponseCreate => "response.create",
            OutboundMessage::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
        }
    }

    pub fn encode(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server → client events the bridge acts on
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Error { message: String },
    TextDelta { fragment: String },
    ResponseDone,
    TurnStart,
    TurnEnd,
    Other { raw: String },
}

impl InboundEvent {
    pub fn decode(payload: &str) -> Self {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => return Self::other(payload),
        };

        let Some(event_type) = value.get("type").and_then(Value::as_str) else {
            return Self::other(payload);
        };

        match event_type {
            "error" => InboundEvent::Error {
                message: value
                    .pointer("/error/message")
                    .or_else(|| value.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown server error")
                    .to_string(),
            },
            "response.text.delta" => match value.get("delta").and_then(Value::as_str) {
                Some(delta) => InboundEvent::TextDelta {
                    fragment: delta.to_string(),
                },
                None => Self::other(payload),
            },
            "response.done" => InboundEvent::ResponseDone,
            "turn_detected.start" => InboundEvent::TurnStart,
            "turn_detected.end" => InboundEvent::TurnEnd,
            _ => Self::other(payload),
        }
    }

    fn other(payload: &str) -> Self {
        InboundEvent::Other {
            raw: payload.to_string(),
        }
    }
}
