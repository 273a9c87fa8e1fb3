//! Test doubles for the daemon link.
//!
//! - [`memory_link`]: an in-memory channel pair standing in for the WebSocket
//!   transport, with the daemon side scripted by the test.
//! - [`MockBilling`]: a scripted billing backend.

use crate::account::{PaymentAvailability, PurchaseResult, VerificationResult};
use crate::account::billing::BillingClient;
use crate::error::{BillingError, LinkError};
use crate::message::{Message, Request};
use crate::transport::{
    BoxedReceiver, BoxedSender, DaemonConnector, MessageReceiver, RequestSender,
};

use common::ErrorLocation;

use std::collections::VecDeque;
use std::panic::Location;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

const SESSION_BUFFER: usize = 32;

/// The daemon's side of one in-memory session.
pub(crate) struct MemoryDaemon {
    message_tx: Option<mpsc::Sender<Message>>,
    request_rx: mpsc::Receiver<Request>,
}

impl MemoryDaemon {
    /// Next request the client sent, or `None` if the client hung up.
    pub(crate) async fn next_request(&mut self) -> Option<Request> {
        self.request_rx.recv().await
    }

    /// Deliver a message to the client.
    pub(crate) async fn send(&self, message: Message) {
        if let Some(tx) = &self.message_tx {
            tx.send(message).await.expect("client receiver gone");
        }
    }

    /// Close the channel from the daemon side.
    pub(crate) fn close(&mut self) {
        self.message_tx = None;
    }
}

/// Connector producing pre-created in-memory sessions, one per `connect()`.
/// Dialing past the last session fails, which tests use to pin down how many
/// connects happened.
pub(crate) struct MemoryConnector {
    sessions: Mutex<VecDeque<(MemorySender, MemoryReceiver)>>,
    dials: AtomicUsize,
}

impl MemoryConnector {
    /// Total `connect()` attempts, successful or not.
    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

/// Build a connector with `sessions` consecutive sessions and the matching
/// daemon-side handles.
pub(crate) fn memory_link(sessions: usize) -> (MemoryConnector, Vec<MemoryDaemon>) {
    let mut client_sides = VecDeque::new();
    let mut daemons = Vec::new();

    for _ in 0..sessions {
        let (message_tx, message_rx) = mpsc::channel(SESSION_BUFFER);
        let (request_tx, request_rx) = mpsc::channel(SESSION_BUFFER);

        client_sides.push_back((
            MemorySender { tx: request_tx },
            MemoryReceiver { rx: message_rx },
        ));
        daemons.push(MemoryDaemon {
            message_tx: Some(message_tx),
            request_rx,
        });
    }

    (
        MemoryConnector {
            sessions: Mutex::new(client_sides),
            dials: AtomicUsize::new(0),
        },
        daemons,
    )
}

#[async_trait]
impl DaemonConnector for MemoryConnector {
    async fn connect(&self) -> Result<(BoxedSender, BoxedReceiver), LinkError> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match session {
            Some((sender, receiver)) => Ok((Box::new(sender), Box::new(receiver))),
            None => Err(LinkError::Handshake {
                message: "No more scripted sessions".to_string(),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

struct MemorySender {
    tx: mpsc::Sender<Request>,
}

#[async_trait]
impl RequestSender for MemorySender {
    async fn send(&mut self, request: Request) -> Result<(), LinkError> {
        self.tx.send(request).await.map_err(|_| LinkError::Send {
            message: "Daemon side gone".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}

struct MemoryReceiver {
    rx: mpsc::Receiver<Message>,
}

#[async_trait]
impl MessageReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<Option<Message>, LinkError> {
        // Dropped daemon sender = channel closed, the distinguishable signal.
        Ok(self.rx.recv().await)
    }
}

/// Scripted billing backend. Successive availability queries pop scripted
/// results; once the script is exhausted the last default applies.
pub(crate) struct MockBilling {
    availability: Mutex<VecDeque<PaymentAvailability>>,
    purchases: Mutex<VecDeque<PurchaseResult>>,
    verification: VerificationResult,
    query_count: AtomicUsize,
    verify_count: AtomicUsize,
}

impl MockBilling {
    pub(crate) fn new() -> Self {
        Self {
            availability: Mutex::new(VecDeque::new()),
            purchases: Mutex::new(VecDeque::new()),
            verification: VerificationResult::NothingToVerify,
            query_count: AtomicUsize::new(0),
            verify_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn script_availability(self, availability: PaymentAvailability) -> Self {
        self.availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(availability);
        self
    }

    pub(crate) fn script_purchase(self, result: PurchaseResult) -> Self {
        self.purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
        self
    }

    pub(crate) fn with_verification(mut self, verification: VerificationResult) -> Self {
        self.verification = verification;
        self
    }

    pub(crate) fn queries(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub(crate) fn verifications(&self) -> usize {
        self.verify_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingClient for MockBilling {
    async fn query_availability(&self) -> Result<PaymentAvailability, BillingError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        Ok(scripted.unwrap_or(PaymentAvailability::ProductsUnavailable))
    }

    async fn purchase_product(&self, _product_id: &str) -> Result<PurchaseResult, BillingError> {
        let scripted = self
            .purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        Ok(scripted.unwrap_or(PurchaseResult::Cancelled))
    }

    async fn verify_purchases(&self) -> Result<VerificationResult, BillingError> {
        self.verify_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.verification.clone())
    }
}
