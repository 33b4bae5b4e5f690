use tracing::{debug, warn};

use crate::realtime::InboundEvent;
use crate::status::StatusSink;

pub const RESPONSE_START_MARKER: &str = "\n[OpenAI]: ";
pub const RESPONSE_END_MARKER: &str = "\n------------ End of response ------------\n";
pub const SPEECH_DETECTED: &str = "\n🎤 Speech detected...\n";
pub const PROCESSING_QUERY: &str = "\n🔄 Processing your query...\n";

/// What the caller must do after an event has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    None,
    /// Send `response.create` now
    RequestResponse,
}

/// Turns inbound events into status output, one response at a time
#[derive(Debug, Default)]
pub struct EventDispatcher {
    response_started: bool,
    response_text: String,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated for the response in progress
    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    pub fn response_started(&self) -> bool {
        self.response_started
    }

    pub fn apply(&mut self, event: InboundEvent, status: &StatusSink) -> DispatchAction {
        match event {
            InboundEvent::Error { message } => {
                warn!("Realtime error event: {}", message);
                status.push(format!("\n❌ Error event: {}\n", message));
            }
            InboundEvent::TextDelta { fragment } => {
                if !self.response_started {
                    status.push(RESPONSE_START_MARKER);
                    self.response_started = true;
                }
                self.response_text.push_str(&fragment);
                status.push(fragment);
            }
            InboundEvent::ResponseDone => {
                status.push(RESPONSE_END_MARKER);
                debug!(chars = self.response_text.len(), "Response complete");
                self.response_text.clear();
                self.response_started = false;
            }
            InboundEvent::TurnStart => status.push(SPEECH_DETECTED),
            InboundEvent::TurnEnd => {
                status.push(PROCESSING_QUERY);
                return DispatchAction::RequestResponse;
            }
            InboundEvent::Other { raw } => {
                debug!(len = raw.len(), "Ignoring realtime event");
            }
        }
        DispatchAction::None
    }
}
