//! WebSocket transport for the OpenAI Realtime API

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::codec::{InboundEvent, OutboundMessage};
use super::transport::{Connection, RealtimeReceiver, RealtimeSender, Transport};
use crate::config::{EndpointParams, TransportConfig};
use crate::error::{BridgeError, ConnectFailure};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct WebSocketTransport {
    verify_tls: bool,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            verify_tls: config.verify_tls,
            connect_timeout: config.connect_timeout(),
        }
    }

    fn tls_connector(&self) -> Result<Connector, BridgeError> {
        if !self.verify_tls {
            warn!("TLS certificate and host name verification is disabled");
        }

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!self.verify_tls)
            .danger_accept_invalid_hostnames(!self.verify_tls)
            .build()
            .map_err(|e| BridgeError::connect(ConnectFailure::Tls, e.to_string()))?;

        Ok(Connector::NativeTls(tls))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &EndpointParams) -> Result<Connection, BridgeError> {
        let url = endpoint.realtime_url();
        info!("Connecting to {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Config(format!("invalid realtime URL {url}: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key))
            .map_err(|e| BridgeError::Config(format!("invalid API key header: {e}")))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let connector = self.tls_connector()?;
        let (socket, response) = tokio::time::timeout(
            self.connect_timeout,
            connect_async_tls_with_config(request, None, false, Some(connector)),
        )
        .await
        .map_err(|_| {
            BridgeError::connect(
                ConnectFailure::Network,
                format!("no handshake within {:?}", self.connect_timeout),
            )
        })?
        .map_err(map_connect_error)?;

        info!("WebSocket handshake complete (HTTP {})", response.status());

        let (sink, stream) = socket.split();
        Ok(Connection {
            sender: Arc::new(WebSocketSender {
                sink: Mutex::new(sink),
                closed: AtomicBool::new(false),
            }),
            receiver: Box::new(WebSocketReceiver { stream }),
        })
    }
}

struct WebSocketSender {
    sink: Mutex<SplitSink<Socket, Message>>,
    closed: AtomicBool,
}

#[async_trait]
impl RealtimeSender for WebSocketSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ConnectionClosed(
                "connection closed locally".to_string(),
            ));
        }

        let text = message.encode()?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(map_stream_error)
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => match map_stream_error(e) {
                BridgeError::ConnectionClosed(_) => Ok(()),
                other => Err(other),
            },
            Err(_) => {
                warn!("WebSocket close did not complete within {:?}", CLOSE_TIMEOUT);
                Ok(())
            }
        }
    }
}

struct WebSocketReceiver {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl RealtimeReceiver for WebSocketReceiver {
    async fn receive(&mut self) -> Result<InboundEvent, BridgeError> {
        loop {
            let message = match self.stream.next().await {
                None => {
                    return Err(BridgeError::ConnectionClosed(
                        "stream ended".to_string(),
                    ))
                }
                Some(Err(e)) => return Err(map_stream_error(e)),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => return Ok(InboundEvent::decode(&text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(InboundEvent::decode(&text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Err(BridgeError::ConnectionClosed(reason));
                }
                // Pongs for server pings are queued by tungstenite and flushed
                // with the next outbound frame.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

fn map_connect_error(error: WsError) -> BridgeError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                BridgeError::connect(
                    ConnectFailure::Authentication,
                    format!("handshake rejected with HTTP {status}"),
                )
            } else {
                BridgeError::connect(
                    ConnectFailure::Handshake,
                    format!("handshake failed with HTTP {status}"),
                )
            }
        }
        WsError::Tls(e) => BridgeError::connect(ConnectFailure::Tls, e.to_string()),
        WsError::Io(e) => BridgeError::connect(ConnectFailure::Network, e.to_string()),
        WsError::Url(e) => BridgeError::Config(format!("invalid realtime URL: {e}")),
        other => BridgeError::connect(ConnectFailure::Handshake, other.to_string()),
    }
}

fn map_stream_error(error: WsError) -> BridgeError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            BridgeError::ConnectionClosed(error.to_string())
        }
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            BridgeError::ConnectionClosed(error.to_string())
        }
        WsError::Io(ref e)
            if matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            BridgeError::ConnectionClosed(error.to_string())
        }
        other => BridgeError::Transport(other.to_string()),
    }
}
