use crate::control::BridgeController;
use crate::status::StatusReceiver;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Start/stop control for the realtime session
    pub controller: Arc<BridgeController>,

    /// Status entries not yet fetched by a client
    pub messages: Arc<Mutex<StatusReceiver>>,
}

impl AppState {
    pub fn new(controller: Arc<BridgeController>, messages: StatusReceiver) -> Self {
        Self {
            controller,
            messages: Arc::new(Mutex::new(messages)),
        }
    }
}
