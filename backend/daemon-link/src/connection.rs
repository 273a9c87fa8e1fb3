//! Connection lifecycle and the consumer-facing link API.
//!
//! [`DaemonConnection`] owns the channel to the daemon and gates everything
//! built on top of it: requests may only be sent while connected, replay-latest
//! state is re-primed on every (re)connect, and loss of the channel resolves
//! every in-flight request as cancelled instead of leaving callers hanging.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --dial ok--> Connected(id)
//!      ^                          |                       |
//!      |                          dial failed             channel closed,
//!      |                          |                       transport fault,
//!      +--------------------------+---<--- teardown ---   or disconnect()
//! ```
//!
//! Entering Connected re-issues the configured initial-state requests, since
//! events that occurred before this connection existed are otherwise lost.
//! Leaving Connected cancels all pending requests and marks every replay-latest
//! event value stale. Losing the channel is never fatal to the process; it
//! degrades observer-facing state (see `account`).
//!
//! Reconnecting automatically is a configured policy, not a default: see
//! [`ReconnectPolicy`]. An explicit `disconnect()` always suppresses it.

use crate::config::ReconnectPolicy;
use crate::correlator::{PendingResponse, RequestCorrelator};
use crate::dispatcher::{EventDispatcher, EventSubscription};
use crate::error::LinkError;
use crate::message::{EventKind, Message, Request, RequestKind};
use crate::transport::{BoxedReceiver, BoxedSender, DaemonConnector};

use common::ErrorLocation;

use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use backoff::backoff::Backoff;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

/// Outbound requests buffered between `send_request` and the writer task.
const OUTBOUND_BUFFER: usize = 64;

/// Bind state of the channel itself.
///
/// Single writer (the lifecycle), arbitrarily many readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { id: Uuid },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

/// Handle to the daemon link.
///
/// Cheap to clone; all clones share the same underlying connection, correlator
/// and dispatcher.
#[derive(Clone)]
pub struct DaemonConnection {
    connector: Arc<dyn DaemonConnector>,
    correlator: Arc<RequestCorrelator>,
    dispatcher: Arc<EventDispatcher>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    outbound: Arc<StdMutex<Option<mpsc::Sender<Request>>>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    reconnect: ReconnectPolicy,
    initial_requests: Arc<Vec<RequestKind>>,
    user_disconnected: Arc<AtomicBool>,
}

impl DaemonConnection {
    pub fn new(
        connector: Arc<dyn DaemonConnector>,
        reconnect: ReconnectPolicy,
        initial_requests: Vec<RequestKind>,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        Self {
            connector,
            correlator: Arc::new(RequestCorrelator::new()),
            dispatcher: Arc::new(EventDispatcher::new()),
            state_tx: Arc::new(state_tx),
            outbound: Arc::new(StdMutex::new(None)),
            tasks: Arc::new(StdMutex::new(Vec::new())),
            reconnect,
            initial_requests: Arc::new(initial_requests),
            user_disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Establish the channel to the daemon.
    ///
    /// Dials through the connector with exponential backoff per the configured
    /// policy. A no-op (logged at debug) when already connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns the last dial error once the backoff policy gives up.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.user_disconnected.store(false, Ordering::SeqCst);
        self.connect_inner().await
    }

    async fn connect_inner(&self) -> Result<(), LinkError> {
        let mut entered = false;
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                entered = true;
                true
            } else {
                false
            }
        });

        if !entered {
            debug!(
                "connect() ignored, link is already {:?}",
                self.current_state()
            );
            return Ok(());
        }

        match self.dial().await {
            Ok((sender, receiver)) => {
                self.install(sender, receiver).await;
                Ok(())
            }
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn dial(&self) -> Result<(BoxedSender, BoxedReceiver), LinkError> {
        let mut backoff = self.reconnect.backoff();

        loop {
            // An automatic reconnect dial may still be retrying when the
            // caller disconnects; stop instead of dialing a daemon that was
            // stopped on purpose.
            if self.user_disconnected.load(Ordering::SeqCst) {
                return Err(LinkError::NotConnected {
                    message: "Dialing abandoned, link was disconnected".to_string(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            match self.connector.connect().await {
                Ok(halves) => return Ok(halves),
                Err(e) => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!("Dialing daemon failed ({e}), retrying in {delay:?}");
                        sleep(delay).await;
                    }
                    None => {
                        warn!("Giving up dialing daemon: {e}");
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn install(&self, sender: BoxedSender, receiver: BoxedReceiver) {
        // The caller may have disconnected while the dial was in flight.
        if self.user_disconnected.load(Ordering::SeqCst) {
            debug!("Dropping freshly dialed channel, link was disconnected meanwhile");
            self.state_tx.send_replace(ConnectionState::Disconnected);
            return;
        }

        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        *lock(&self.outbound) = Some(outbound_tx);

        // The reader owns the Connected -> Disconnected transition. It must
        // not exist until Connected is published, otherwise a channel that
        // dies instantly lets its teardown run first and this install would
        // overwrite Disconnected on a dead link.
        self.state_tx
            .send_replace(ConnectionState::Connected { id });

        let writer = tokio::spawn(writer_task(outbound_rx, sender));
        let reader = tokio::spawn(reader_task(self.clone(), receiver));
        {
            let mut tasks = lock(&self.tasks);
            tasks.clear();
            tasks.push(writer);
            tasks.push(reader);
        }

        info!("Connected to daemon (connection {id})");

        for kind in self.initial_requests.iter() {
            if let Err(e) = self.notify(*kind, Value::Null).await {
                warn!("Failed to issue initial {kind:?} request: {e}");
            }
        }
    }

    /// Tear down the channel and suppress any automatic reconnect.
    ///
    /// Every pending request resolves as cancelled and replay-latest event
    /// values are marked stale. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.user_disconnected.store(true, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for handle in &handles {
            handle.abort();
        }

        self.teardown();
        info!("Disconnected from daemon");
    }

    /// Send a correlated request and obtain its pending response.
    ///
    /// The completion slot is enqueued *before* the request is handed to the
    /// writer, so a response racing the write always finds its waiter.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] when the link is not connected, or
    /// [`LinkError::ChannelClosed`] if the channel tore down mid-send.
    pub async fn send_request(
        &self,
        kind: RequestKind,
        payload: Value,
    ) -> Result<PendingResponse, LinkError> {
        let tx = lock(&self.outbound)
            .clone()
            .ok_or_else(|| LinkError::NotConnected {
                message: format!("Cannot send {kind:?} request, link is not connected"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let pending = self.correlator.register(kind);

        if tx.send(Request::new(kind, payload)).await.is_err() {
            // Never observably sent, so the waiter must not consume a future
            // response ordinal of this kind.
            self.correlator.unregister(kind, pending.id());
            return Err(LinkError::ChannelClosed {
                message: format!("Channel closed while sending {kind:?} request"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(pending)
    }

    /// Send a fire-and-forget request (no response correlation).
    pub async fn notify(&self, kind: RequestKind, payload: Value) -> Result<(), LinkError> {
        let tx = lock(&self.outbound)
            .clone()
            .ok_or_else(|| LinkError::NotConnected {
                message: format!("Cannot send {kind:?} request, link is not connected"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        tx.send(Request::new(kind, payload))
            .await
            .map_err(|_| LinkError::ChannelClosed {
                message: format!("Channel closed while sending {kind:?} request"),
                location: ErrorLocation::from(Location::caller()),
            })
    }

    /// Subscribe to events of `kind`. See `dispatcher` for replay semantics.
    pub fn subscribe(&self, kind: EventKind) -> EventSubscription {
        self.dispatcher.subscribe(kind)
    }

    /// Most recent value of a replay-latest event kind, if known.
    pub fn latest(&self, kind: EventKind) -> Option<Value> {
        self.dispatcher.latest(kind)
    }

    pub(crate) fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    fn teardown(&self) {
        *lock(&self.outbound) = None;
        self.correlator.cancel_all();
        self.dispatcher.mark_stale();

        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous.is_connected() {
            debug!("Link torn down from {previous:?}");
        }
    }

    fn handle_channel_loss(&self) {
        self.teardown();

        if self.reconnect.auto_reconnect && !self.user_disconnected.load(Ordering::SeqCst) {
            info!("Channel lost, reconnecting per policy");
            let link = self.clone();
            tokio::spawn(async move {
                if let Err(e) = link.connect_inner().await {
                    warn!("Automatic reconnect failed: {e}");
                }
            });
        }
    }
}

/// Drains buffered outbound requests into the channel's write half.
async fn writer_task(mut outbound_rx: mpsc::Receiver<Request>, mut sender: BoxedSender) {
    while let Some(request) = outbound_rx.recv().await {
        if let Err(e) = sender.send(request).await {
            warn!("Outbound write failed: {e}");
            break;
        }
    }

    debug!("Writer task stopped");
}

/// Routes inbound messages until the channel closes or faults, then runs the
/// disconnect path exactly once.
async fn reader_task(link: DaemonConnection, mut receiver: BoxedReceiver) {
    loop {
        match receiver.recv().await {
            Ok(Some(Message::Response { kind, payload })) => {
                link.correlator.complete(kind, payload);
            }
            Ok(Some(Message::Event { kind, payload })) => {
                link.dispatcher.publish(kind, payload);
            }
            Ok(None) => {
                info!("Daemon closed the channel");
                break;
            }
            Err(e) => {
                warn!("Channel fault: {e}");
                break;
            }
        }
    }

    link.handle_channel_loss();
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
