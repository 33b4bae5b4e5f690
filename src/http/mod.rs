//! HTTP API for controlling the bridge from another process
//!
//! - POST /session/start - Start the realtime session
//! - POST /session/stop - Stop it and release the audio device
//! - GET /session/status - Desired and actual session state
//! - GET /session/messages - Drain pending status entries
//! - GET /prompt - Current instruction text
//! - PUT /prompt - Replace it for the next attempt
//! - GET /health - Health check
//! - GET /health/openai - Check the API key against the REST API

mod handlers;
mod routes;
mod state;

pub use handlers::{
    ApiKeyCheckResponse, ControlResponse, MessagesResponse, PromptBody, StatusResponse,
};
pub use routes::create_router;
pub use state::AppState;
