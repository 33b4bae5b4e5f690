use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::codec::{InboundEvent, OutboundMessage};
use crate::config::EndpointParams;
use crate::error::BridgeError;
use crate::session::SessionConfig;

/// Write half of a live connection
///
/// Shared between the capture task and the turn-end responder, so sends take
/// `&self` and implementations serialise them internally.
#[async_trait]
pub trait RealtimeSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BridgeError>;

    /// Close the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), BridgeError>;
}

/// Read half of a live connection
#[async_trait]
pub trait RealtimeReceiver: Send {
    /// Wait for the next event. Closure surfaces as [`BridgeError::ConnectionClosed`].
    ///
    /// Must be cancel-safe: dropping the future loses no event.
    async fn receive(&mut self) -> Result<InboundEvent, BridgeError>;
}

pub struct Connection {
    pub sender: Arc<dyn RealtimeSender>,
    pub receiver: Box<dyn RealtimeReceiver>,
}

/// Opens connections to the realtime backend
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &EndpointParams) -> Result<Connection, BridgeError>;
}

/// Connect and prime the session: `session.update` with this attempt's config,
/// then `response.create` so the server starts producing output right away.
pub async fn establish(
    transport: &dyn Transport,
    endpoint: &EndpointParams,
    session: &SessionConfig,
) -> Result<Connection, BridgeError> {
    let connection = transport.connect(endpoint).await?;
    let sender = Arc::clone(&connection.sender);

    let primed = async {
        sender
            .send(&OutboundMessage::SessionUpdate {
                session: session.clone(),
            })
            .await?;
        sender.send(&OutboundMessage::ResponseCreate).await
    }
    .await;

    if let Err(e) = primed {
        let _ = sender.close().await;
        return Err(e);
    }

    info!("Realtime session configured (model={})", endpoint.model);

    Ok(connection)
}
