use super::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the request changed anything
    pub accepted: bool,

    /// Desired-running state after the request
    pub running: bool,

    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub desired_running: bool,
    pub session_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyCheckResponse {
    pub valid: bool,

    /// Models visible to the key when it was accepted
    pub models: Option<usize>,

    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP request to start session");

    let controller = state.controller.clone();
    let started = match tokio::task::spawn_blocking(move || controller.start()).await {
        Ok(started) => started,
        Err(e) => return internal_error(format!("Failed to start session: {}", e)),
    };

    let (code, message) = if started {
        (StatusCode::OK, "Session starting")
    } else {
        (
            StatusCode::CONFLICT,
            "Session not started; see /session/messages for details",
        )
    };
    (
        code,
        Json(ControlResponse {
            accepted: started,
            running: state.controller.is_running(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// POST /session/stop
/// Blocks until the session has drained or the drain timeout has passed
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP request to stop session");

    let controller = state.controller.clone();
    let stopped = match tokio::task::spawn_blocking(move || controller.stop()).await {
        Ok(stopped) => stopped,
        Err(e) => return internal_error(format!("Failed to stop session: {}", e)),
    };

    let message = if stopped {
        "Session stopped"
    } else {
        "No active session to stop"
    };
    (
        StatusCode::OK,
        Json(ControlResponse {
            accepted: stopped,
            running: state.controller.is_running(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// GET /session/status
pub async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        desired_running: state.controller.is_running(),
        session_active: state.controller.is_session_active(),
    })
}

/// GET /session/messages
/// Returns pending status entries; each entry is delivered once
pub async fn drain_messages(State(state): State<AppState>) -> impl IntoResponse {
    let messages = state.messages.lock().await.drain_all();
    Json(MessagesResponse { messages })
}

/// GET /prompt
/// Instruction text the next session attempt will use
pub async fn get_prompt(State(state): State<AppState>) -> impl IntoResponse {
    let provider = state.controller.config_provider();
    match tokio::task::spawn_blocking(move || provider.load_instructions()).await {
        Ok(prompt) => Json(PromptBody { prompt }).into_response(),
        Err(e) => internal_error(format!("Failed to load prompt: {}", e)),
    }
}

/// PUT /prompt
/// Takes effect on the next connection attempt
pub async fn put_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> impl IntoResponse {
    info!("HTTP request to update prompt");

    let provider = state.controller.config_provider();
    let text = body.prompt.clone();
    match tokio::task::spawn_blocking(move || provider.save_instructions(&text)).await {
        Ok(Ok(())) => Json(body).into_response(),
        Ok(Err(e)) => {
            warn!("Prompt update rejected: {}", e);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => internal_error(format!("Failed to save prompt: {}", e)),
    }
}

/// GET /health/openai
/// Lists models with the configured key; 502 when the backend refuses it
pub async fn check_api_key(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.check_api_key().await {
        Ok(models) => (
            StatusCode::OK,
            Json(ApiKeyCheckResponse {
                valid: true,
                models: Some(models),
                message: "API key is valid".to_string(),
            }),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiKeyCheckResponse {
                valid: false,
                models: None,
                message: e.to_string(),
            }),
        ),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn internal_error(message: String) -> axum::response::Response {
    error!("{}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
        .into_response()
}
