//! Account state reconciliation, including payment verification.
//!
//! The most intricate consumer of the link primitives: it merges four
//! independently-arriving signals into one coherent snapshot.
//!
//! 1. Connection lifecycle (is the daemon reachable at all).
//! 2. Device identity, from the `DeviceState` event stream.
//! 3. Account expiry, from the `AccountExpiry` event stream.
//! 4. Locally-triggered billing operations: the payment-availability query and
//!    the purchase flow with asynchronous verification.
//!
//! Consumers always observe a whole [`AccountSnapshot`], never a torn one. A
//! source that has not produced a value yet maps to a documented default
//! (`Loading` for payment availability, `None` for expiry), never to a silent
//! gap. A lost daemon channel degrades the snapshot (`daemon_available =
//! false`); it never surfaces as a fault.

pub mod billing;
pub mod state;

pub use billing::{BillingClient, PaymentAvailability, Product, PurchaseResult, VerificationResult};
pub use state::{AccountExpiryEvent, DeviceState};

use crate::config::LinkConfig;
use crate::connection::{ConnectionState, DaemonConnection};
use crate::dispatcher::EventSubscription;
use crate::message::{EventKind, RequestKind};

use common::RedactedAccountNumber;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;

/// UI-facing view of payment availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentState {
    /// Availability has not been determined yet.
    Loading,
    /// Billing works but nothing can be purchased right now.
    NoPayment,
    PaymentAvailable(Vec<Product>),
    Error(String),
}

impl From<&PaymentAvailability> for PaymentState {
    fn from(availability: &PaymentAvailability) -> Self {
        match availability {
            PaymentAvailability::ProductsAvailable(products) => {
                PaymentState::PaymentAvailable(products.clone())
            }
            PaymentAvailability::ProductsUnavailable => PaymentState::NoPayment,
            PaymentAvailability::Error(reason) => PaymentState::Error(reason.clone()),
        }
    }
}

/// Immutable snapshot combining the latest known value from each source.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    /// False while the daemon channel is down; observers show "service
    /// unavailable" rather than acting on the rest of the snapshot.
    pub daemon_available: bool,
    pub device_name: Option<String>,
    pub account_number: Option<RedactedAccountNumber>,
    pub account_expiry: Option<DateTime<Utc>>,
    pub billing_payment_state: PaymentState,
    pub purchase_result: Option<PurchaseResult>,
}

impl Default for AccountSnapshot {
    fn default() -> Self {
        Self {
            daemon_available: false,
            device_name: None,
            account_number: None,
            account_expiry: None,
            billing_payment_state: PaymentState::Loading,
            purchase_result: None,
        }
    }
}

/// Produces [`AccountSnapshot`]s from the link and the billing backend.
///
/// Cheap to clone; all clones share the same snapshot stream.
#[derive(Clone)]
pub struct AccountReconciler {
    connection: DaemonConnection,
    billing: Arc<dyn BillingClient>,
    snapshot_tx: Arc<watch::Sender<AccountSnapshot>>,
    availability_tx: Arc<watch::Sender<Option<PaymentAvailability>>>,
    purchase_tx: Arc<watch::Sender<Option<PurchaseResult>>>,
    payment_availability_delay: Duration,
}

impl AccountReconciler {
    /// Start reconciling. Spawns the combine task and primes the local
    /// sources: outstanding purchases are verified (without surfacing a
    /// purchase result), availability is queried once, expiry is refreshed.
    pub fn spawn(
        connection: DaemonConnection,
        billing: Arc<dyn BillingClient>,
        config: &LinkConfig,
    ) -> Self {
        let (snapshot_tx, _snapshot_rx) = watch::channel(AccountSnapshot::default());
        let snapshot_tx = Arc::new(snapshot_tx);
        let (availability_tx, availability_rx) = watch::channel(None);
        let (purchase_tx, purchase_rx) = watch::channel(None);

        tokio::spawn(combine_loop(
            connection.state(),
            connection.subscribe(EventKind::DeviceState),
            connection.subscribe(EventKind::AccountExpiry),
            availability_rx,
            purchase_rx,
            Arc::clone(&snapshot_tx),
        ));

        let reconciler = Self {
            connection,
            billing,
            snapshot_tx,
            availability_tx: Arc::new(availability_tx),
            purchase_tx: Arc::new(purchase_tx),
            payment_availability_delay: config.payment_availability_delay(),
        };

        let startup = reconciler.clone();
        tokio::spawn(async move {
            startup.verify_purchases(false).await;
            startup.query_payment_availability().await;
        });

        reconciler
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> AccountSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Observe snapshots as they are produced.
    pub fn watch(&self) -> watch::Receiver<AccountSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Run the purchase flow for `product_id` to completion.
    ///
    /// Whatever the outcome (completed, pending verification, cancelled, or
    /// failed), availability is re-queried afterwards (purchasing changes what
    /// can be purchased) and account expiry is refreshed unconditionally (a
    /// successful purchase is the expected way expiry changes). The re-query
    /// waits `payment_availability_delay` first so the daemon's own state has
    /// caught up with the just-completed purchase.
    pub async fn purchase(&self, product_id: &str) {
        let result = match self.billing.purchase_product(product_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Purchase of {product_id} failed: {e}");
                PurchaseResult::Error(e.to_string())
            }
        };

        info!("Purchase of {product_id} finished: {result:?}");
        self.purchase_tx.send_replace(Some(result));

        sleep(self.payment_availability_delay).await;
        self.query_payment_availability().await;
        self.refresh_account_expiry().await;
    }

    /// Query the billing backend for what can currently be purchased.
    ///
    /// The result (including a billing error, mapped to
    /// [`PaymentAvailability::Error`]) replaces the availability source; the
    /// snapshot leaves `Loading` only after the first query resolves.
    pub async fn query_payment_availability(&self) {
        let availability = match self.billing.query_availability().await {
            Ok(availability) => availability,
            Err(e) => {
                warn!("Payment availability query failed: {e}");
                PaymentAvailability::Error(e.to_string())
            }
        };

        self.availability_tx.send_replace(Some(availability));
    }

    /// Verify outstanding purchases, optionally surfacing the implied
    /// purchase result, then refresh expiry either way.
    pub async fn verify_purchases(&self, update_purchase_result: bool) {
        match self.billing.verify_purchases().await {
            Ok(result) => {
                debug!("Purchase verification finished: {result:?}");
                if update_purchase_result {
                    if let Some(purchase) = result.to_purchase_result() {
                        self.purchase_tx.send_replace(Some(purchase));
                    }
                }
            }
            Err(e) => warn!("Purchase verification failed: {e}"),
        }

        self.refresh_account_expiry().await;
    }

    async fn refresh_account_expiry(&self) {
        if let Err(e) = self
            .connection
            .notify(RequestKind::FetchAccountExpiry, Value::Null)
            .await
        {
            // Disconnected; the snapshot is already degraded.
            debug!("Account expiry refresh skipped: {e}");
        }
    }
}

/// Rebuilds the snapshot whenever any source emits.
async fn combine_loop(
    mut state_rx: watch::Receiver<ConnectionState>,
    mut device_sub: EventSubscription,
    mut expiry_sub: EventSubscription,
    mut availability_rx: watch::Receiver<Option<PaymentAvailability>>,
    mut purchase_rx: watch::Receiver<Option<PurchaseResult>>,
    snapshot_tx: Arc<watch::Sender<AccountSnapshot>>,
) {
    let mut device = DeviceState::Unknown;
    let mut expiry: Option<DateTime<Utc>> = None;

    loop {
        let snapshot = build_snapshot(
            *state_rx.borrow_and_update(),
            &device,
            expiry,
            availability_rx.borrow_and_update().as_ref(),
            purchase_rx.borrow_and_update().as_ref(),
        );
        snapshot_tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Identity and expiry from a dead connection are stale; show
                // unknown until fresh events supersede.
                if *state_rx.borrow() == ConnectionState::Disconnected {
                    device = DeviceState::Unknown;
                    expiry = None;
                }
            }
            payload = device_sub.next() => {
                match payload {
                    Some(value) => match serde_json::from_value::<DeviceState>(value) {
                        Ok(new_device) => device = new_device,
                        Err(e) => warn!("Ignoring malformed device state event: {e}"),
                    },
                    None => break,
                }
            }
            payload = expiry_sub.next() => {
                match payload {
                    Some(value) => match serde_json::from_value::<AccountExpiryEvent>(value) {
                        Ok(event) => expiry = event.expiry,
                        Err(e) => warn!("Ignoring malformed account expiry event: {e}"),
                    },
                    None => break,
                }
            }
            changed = availability_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = purchase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Account reconciler stopped");
}

fn build_snapshot(
    connection: ConnectionState,
    device: &DeviceState,
    expiry: Option<DateTime<Utc>>,
    availability: Option<&PaymentAvailability>,
    purchase: Option<&PurchaseResult>,
) -> AccountSnapshot {
    AccountSnapshot {
        daemon_available: connection.is_connected(),
        device_name: device.device_name().map(str::to_owned),
        account_number: device
            .account_number()
            .map(|number| RedactedAccountNumber::new(number.to_owned())),
        account_expiry: expiry,
        billing_payment_state: availability
            .map(PaymentState::from)
            .unwrap_or(PaymentState::Loading),
        purchase_result: purchase.cloned(),
    }
}
