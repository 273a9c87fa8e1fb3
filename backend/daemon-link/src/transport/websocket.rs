//! WebSocket transport to the local daemon.
//!
//! The daemon exposes its IPC endpoint as a WebSocket server on localhost.
//! Frames are JSON text; binary and control frames carry no link messages and
//! are skipped. See `transport` for the closure contract.

use crate::error::LinkError;
use crate::message::{Message, Request};
use crate::transport::{
    BoxedReceiver, BoxedSender, DaemonConnector, MessageReceiver, RequestSender,
};

use common::ErrorLocation;

use std::panic::Location;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the daemon's WebSocket endpoint.
pub struct WebSocketConnector {
    endpoint: Url,
}

impl WebSocketConnector {
    /// Create a connector for the given `ws://` endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Handshake`] if the endpoint is not a valid
    /// WebSocket URL.
    #[track_caller]
    pub fn new(endpoint: &str) -> Result<Self, LinkError> {
        let endpoint = Url::parse(endpoint).map_err(|e| LinkError::Handshake {
            message: format!("Invalid daemon endpoint '{endpoint}': {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        match endpoint.scheme() {
            "ws" | "wss" => Ok(Self { endpoint }),
            other => Err(LinkError::Handshake {
                message: format!("Unsupported endpoint scheme '{other}', expected ws or wss"),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DaemonConnector for WebSocketConnector {
    async fn connect(&self) -> Result<(BoxedSender, BoxedReceiver), LinkError> {
        debug!("Dialing daemon at {}", self.endpoint);

        let (ws_stream, _) = connect_async(self.endpoint.as_str()).await.map_err(|e| {
            LinkError::Handshake {
                message: format!("WebSocket handshake with {} failed: {e}", self.endpoint),
                location: ErrorLocation::from(Location::caller()),
            }
        })?;

        let (write, read) = ws_stream.split();

        Ok((
            Box::new(WebSocketSender { write }),
            Box::new(WebSocketReceiver { read }),
        ))
    }
}

struct WebSocketSender {
    write: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl RequestSender for WebSocketSender {
    async fn send(&mut self, request: Request) -> Result<(), LinkError> {
        let text = serde_json::to_string(&request).map_err(|e| LinkError::Encode {
            message: format!("Failed to encode {:?} request: {e}", request.kind),
            location: ErrorLocation::from(Location::caller()),
        })?;

        self.write
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| LinkError::Send {
                message: format!("Failed to send {:?} request: {e}", request.kind),
                location: ErrorLocation::from(Location::caller()),
            })
    }
}

struct WebSocketReceiver {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl MessageReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Result<Option<Message>, LinkError> {
        while let Some(frame) = self.read.next().await {
            match frame {
                // Frames are self-delimiting JSON, so one undecodable frame
                // cannot desync the stream; skip it rather than tearing the
                // channel down.
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => warn!("Skipping undecodable daemon frame: {e}"),
                },
                Ok(WsMessage::Close(_)) => {
                    debug!("Daemon closed the channel");
                    return Ok(None);
                }
                Ok(WsMessage::Binary(_)) => {
                    warn!("Skipping unexpected binary frame from daemon");
                }
                // Control frames are handled by tungstenite itself.
                Ok(_) => {}
                Err(e) => {
                    return Err(LinkError::Read {
                        message: format!("Error reading from daemon: {e}"),
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
            }
        }

        Ok(None)
    }
}
