//! Test helpers for link integration tests.
//!
//! [`MockDaemon`] is a scripted daemon behind a real WebSocket server on an
//! ephemeral localhost port: it hands inbound requests to the test and sends
//! whatever the test scripts, so the full transport stack is exercised.

use daemon_link::message::{EventKind, Message, Request, RequestKind};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const CONTROL_BUFFER: usize = 32;

enum DaemonAction {
    Send(Message),
    SendRaw(String),
    Close,
}

/// Scripted daemon the tests drive. Accepts one WebSocket connection at a
/// time; closing a connection returns to accepting, so reconnects work.
pub struct MockDaemon {
    endpoint: String,
    action_tx: mpsc::Sender<DaemonAction>,
    request_rx: mpsc::Receiver<Request>,
}

/// Start a mock daemon on an ephemeral localhost port.
pub async fn start_mock_daemon() -> MockDaemon {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock daemon listener");
    let endpoint = format!(
        "ws://{}",
        listener.local_addr().expect("listener has a local addr")
    );

    let (action_tx, action_rx) = mpsc::channel(CONTROL_BUFFER);
    let (request_tx, request_rx) = mpsc::channel(CONTROL_BUFFER);
    tokio::spawn(serve(listener, action_rx, request_tx));

    MockDaemon {
        endpoint,
        action_tx,
        request_rx,
    }
}

impl MockDaemon {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Next request the client sent over the wire.
    pub async fn next_request(&mut self) -> Request {
        self.request_rx
            .recv()
            .await
            .expect("mock daemon task stopped")
    }

    pub async fn respond(&self, kind: RequestKind, payload: Value) {
        self.send(Message::Response { kind, payload }).await;
    }

    pub async fn emit(&self, kind: EventKind, payload: Value) {
        self.send(Message::Event { kind, payload }).await;
    }

    /// Send an arbitrary text frame, bypassing the message model.
    pub async fn send_raw(&self, frame: &str) {
        self.action_tx
            .send(DaemonAction::SendRaw(frame.to_string()))
            .await
            .expect("mock daemon task stopped");
    }

    /// Close the current connection from the daemon side.
    pub async fn close(&self) {
        self.action_tx
            .send(DaemonAction::Close)
            .await
            .expect("mock daemon task stopped");
    }

    async fn send(&self, message: Message) {
        self.action_tx
            .send(DaemonAction::Send(message))
            .await
            .expect("mock daemon task stopped");
    }
}

async fn serve(
    listener: TcpListener,
    mut action_rx: mpsc::Receiver<DaemonAction>,
    request_tx: mpsc::Sender<Request>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let ws = accept_async(stream)
            .await
            .expect("WebSocket handshake with test client failed");
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                action = action_rx.recv() => match action {
                    Some(DaemonAction::Send(message)) => {
                        let text = serde_json::to_string(&message)
                            .expect("scripted message serializes");
                        if write.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(DaemonAction::SendRaw(frame)) => {
                        if write.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(DaemonAction::Close) => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                    // All MockDaemon handles dropped; test is over.
                    None => return,
                },
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let request: Request = serde_json::from_str(text.as_str())
                            .expect("client sent valid request JSON");
                        if request_tx.send(request).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
            }
        }
    }
}
