//! REST calls against the same backend, outside the realtime socket

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{EndpointParams, TransportConfig};
use crate::error::{BridgeError, ConnectFailure};

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// List models with the configured key. Returns how many are visible.
///
/// 401 and 403 map to `ConnectFailure::Authentication` so the status hint
/// points at the key.
pub async fn check_api_key(
    endpoint: &EndpointParams,
    transport: &TransportConfig,
) -> Result<usize, BridgeError> {
    let url = endpoint.models_url()?;
    info!("Checking API key against {}", url);

    let client = reqwest::Client::builder()
        .timeout(transport.connect_timeout())
        .danger_accept_invalid_certs(!transport.verify_tls)
        .build()
        .map_err(|e| BridgeError::connect(ConnectFailure::Tls, e.to_string()))?;

    let response = client
        .get(&url)
        .bearer_auth(&endpoint.api_key)
        .send()
        .await
        .map_err(|e| BridgeError::connect(ConnectFailure::Network, e.to_string()))?;

    let status = response.status();
    match status {
        s if s.is_success() => {
            let models: ModelList = response
                .json()
                .await
                .map_err(|e| BridgeError::Protocol(format!("model list: {e}")))?;
            Ok(models.data.len())
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!("API key rejected with {}", status);
            Err(BridgeError::connect(
                ConnectFailure::Authentication,
                format!("HTTP {status}"),
            ))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(BridgeError::connect(
                ConnectFailure::Handshake,
                format!("HTTP {status} - {}", body.trim()),
            ))
        }
    }
}
