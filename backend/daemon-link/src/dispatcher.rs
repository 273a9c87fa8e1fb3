//! Event fan-out to subscribers.
//!
//! Events are broadcast, not queue-stealing: every live subscription for a kind
//! observes every dispatch, and subscribers never interfere with one another.
//! Each [`EventKind`] declares its replay semantics explicitly:
//!
//! - [`Replay::Latest`] kinds are *state*. A late subscriber immediately
//!   observes the most recent value. A disconnect marks the value stale, so
//!   after a reconnect a late subscriber sees "unknown" until a fresh event
//!   supersedes it.
//! - [`Replay::None`] kinds are *transient occurrences*. Nothing is observed
//!   retroactively, and an unobserved dispatch is simply dropped.
//!
//! Dropping an [`EventSubscription`] is the unsubscription; it is safe while a
//! dispatch is in flight, and a dispatch to zero subscribers is not an error.

use crate::message::{EventKind, Replay};

use std::collections::HashMap;

use log::{trace, warn};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

/// Buffered dispatches per transient kind before a slow subscriber starts
/// losing the oldest ones.
const TRANSIENT_BUFFER: usize = 16;

/// Fans inbound events out to zero-or-more interested subscribers by kind.
pub struct EventDispatcher {
    stateful: HashMap<EventKind, watch::Sender<Option<Value>>>,
    transient: HashMap<EventKind, broadcast::Sender<Value>>,
}

impl EventDispatcher {
    /// Channels for every kind are created eagerly so a subscription taken
    /// before the first dispatch (or before the first connect) is already live.
    pub fn new() -> Self {
        let mut stateful = HashMap::new();
        let mut transient = HashMap::new();

        for kind in EventKind::ALL {
            match kind.replay() {
                Replay::Latest => {
                    let (tx, _rx) = watch::channel(None);
                    stateful.insert(kind, tx);
                }
                Replay::None => {
                    let (tx, _rx) = broadcast::channel(TRANSIENT_BUFFER);
                    transient.insert(kind, tx);
                }
            }
        }

        Self {
            stateful,
            transient,
        }
    }

    /// Push `payload` to every live subscription for `kind`.
    pub fn publish(&self, kind: EventKind, payload: Value) {
        if let Some(tx) = self.stateful.get(&kind) {
            tx.send_replace(Some(payload));
        } else if let Some(tx) = self.transient.get(&kind) {
            if tx.send(payload).is_err() {
                trace!("No subscriber for transient {kind:?} event, dropped");
            }
        }
    }

    /// A private, lazily-consumed sequence of payloads for `kind`.
    pub fn subscribe(&self, kind: EventKind) -> EventSubscription {
        let inner = if let Some(tx) = self.stateful.get(&kind) {
            SubscriptionInner::Latest {
                rx: tx.subscribe(),
                primed: false,
            }
        } else if let Some(tx) = self.transient.get(&kind) {
            SubscriptionInner::Transient { rx: tx.subscribe() }
        } else {
            // EventKind::ALL is exhaustive, so this arm is unreachable; a
            // pre-closed subscription keeps the API total anyway.
            let (_tx, rx) = broadcast::channel(1);
            SubscriptionInner::Transient { rx }
        };

        EventSubscription { kind, inner }
    }

    /// Most recent value of a replay-latest kind, if one is known and not
    /// stale. Always `None` for transient kinds.
    pub fn latest(&self, kind: EventKind) -> Option<Value> {
        self.stateful.get(&kind).and_then(|tx| tx.borrow().clone())
    }

    /// Forget every replay-latest value.
    ///
    /// Called on disconnect so a subscriber arriving after a reconnect
    /// observes "unknown" rather than state from the previous connection.
    pub fn mark_stale(&self) {
        for tx in self.stateful.values() {
            tx.send_replace(None);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// A registration of interest in events of one kind.
///
/// Dropping the subscription unregisters it.
pub struct EventSubscription {
    kind: EventKind,
    inner: SubscriptionInner,
}

enum SubscriptionInner {
    Latest {
        rx: watch::Receiver<Option<Value>>,
        primed: bool,
    },
    Transient {
        rx: broadcast::Receiver<Value>,
    },
}

impl EventSubscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next payload for this kind, or `None` once the dispatcher is gone.
    ///
    /// For a replay-latest kind the first call yields the current value
    /// immediately when one is known; stale markers are skipped, never yielded.
    pub async fn next(&mut self) -> Option<Value> {
        match &mut self.inner {
            SubscriptionInner::Latest { rx, primed } => {
                loop {
                    if !*primed {
                        *primed = true;
                        let current = rx.borrow_and_update().clone();
                        if let Some(value) = current {
                            return Some(value);
                        }
                    }

                    rx.changed().await.ok()?;

                    let current = rx.borrow_and_update().clone();
                    if let Some(value) = current {
                        return Some(value);
                    }
                    // Stale marker after a disconnect; keep waiting for a
                    // fresh value.
                }
            }
            SubscriptionInner::Transient { rx } => loop {
                match rx.recv().await {
                    Ok(value) => return Some(value),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            "Subscriber lagged on transient {:?} events, {missed} dropped",
                            self.kind
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}
