//! Request/response correlation.
//!
//! The daemon does not echo request ids. Instead, the protocol contract is that
//! responses of a given [`RequestKind`] arrive in the submission order of the
//! requests of that kind. Correlation therefore reduces to a per-kind FIFO of
//! completion slots: the Nth response of kind K completes the Nth still-pending
//! request of kind K.
//!
//! That contract is an assumption about the daemon, not something this side can
//! enforce; it is pinned by an integration test against the mock daemon. If a
//! future protocol revision adds explicit request ids, this module is the single
//! place to swap the matching strategy.
//!
//! # Locking
//!
//! All queue mutation (enqueue on send, dequeue on response, drain on
//! cancellation) happens under one mutex per correlator instance. The lock is
//! never held across I/O or an `.await`; callers enqueue first and perform the
//! network write afterwards, so a response racing the write always finds its
//! waiter already queued.

use crate::error::LinkError;
use crate::message::RequestKind;

use common::ErrorLocation;

use std::collections::{HashMap, VecDeque};
use std::panic::Location;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::oneshot;

/// Pairs outbound requests with their eventual inbound responses.
pub struct RequestCorrelator {
    inner: Mutex<CorrelatorInner>,
}

struct CorrelatorInner {
    next_id: u64,
    queues: HashMap<RequestKind, VecDeque<Slot>>,
}

struct Slot {
    id: u64,
    tx: oneshot::Sender<Value>,
}

/// One in-flight request awaiting a response of a specific kind.
///
/// Resolved exactly once: by a matching response, or as cancelled when the
/// channel closes. Dropping it abandons the wait; the slot stays queued so the
/// FIFO ordinal matching is not disturbed, and the late response is absorbed
/// silently when it arrives.
pub struct PendingResponse {
    kind: RequestKind,
    id: u64,
    rx: oneshot::Receiver<Value>,
}

impl PendingResponse {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Await the response payload.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::RequestCancelled`] if the channel closed (or the
    /// link was torn down) before a response arrived. There is no implicit
    /// timeout; layer `tokio::time::timeout` on top if one is wanted.
    pub async fn wait(self) -> Result<Value, LinkError> {
        self.rx.await.map_err(|_| LinkError::RequestCancelled {
            message: format!("{:?} request cancelled before a response arrived", self.kind),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CorrelatorInner {
                next_id: 0,
                queues: HashMap::new(),
            }),
        }
    }

    /// Enqueue a waiter for the next unclaimed response of `kind`.
    ///
    /// Must be called *before* the request is observably sent, otherwise a
    /// fast response could find no pending entry and be discarded as spurious.
    pub fn register(&self, kind: RequestKind) -> PendingResponse {
        let (tx, rx) = oneshot::channel();

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.queues.entry(kind).or_default().push_back(Slot { id, tx });

        PendingResponse { kind, id, rx }
    }

    /// Remove a still-queued waiter whose request was never actually sent
    /// (the outbound write failed). Does nothing if the slot was already
    /// completed or cancelled.
    pub(crate) fn unregister(&self, kind: RequestKind, id: u64) {
        let mut inner = self.lock();
        if let Some(queue) = inner.queues.get_mut(&kind) {
            queue.retain(|slot| slot.id != id);
        }
    }

    /// Complete the oldest pending request of `kind` with `payload`.
    ///
    /// A response with no pending entry is spurious (a benign race at
    /// teardown): logged and discarded, never fatal. A response whose waiter
    /// has been abandoned is absorbed silently so it cannot block the next
    /// entry of the same kind.
    pub fn complete(&self, kind: RequestKind, payload: Value) {
        let slot = self.lock().queues.get_mut(&kind).and_then(VecDeque::pop_front);

        match slot {
            Some(slot) => {
                if slot.tx.send(payload).is_err() {
                    debug!("Caller abandoned {kind:?} request, response absorbed");
                }
            }
            None => {
                warn!("Discarding spurious {kind:?} response with no pending request");
            }
        }
    }

    /// Resolve every still-pending request, across all kinds, as cancelled.
    ///
    /// Called when the channel closes so no caller blocks forever past a
    /// disconnect. Responses arriving afterwards are spurious by definition.
    pub fn cancel_all(&self) {
        let mut inner = self.lock();
        let cancelled: usize = inner.queues.values().map(VecDeque::len).sum();
        inner.queues.clear();

        if cancelled > 0 {
            debug!("Cancelled {cancelled} pending request(s)");
        }
    }

    /// Number of pending requests of `kind`.
    pub fn pending(&self, kind: RequestKind) -> usize {
        self.lock().queues.get(&kind).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
