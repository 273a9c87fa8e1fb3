// Unit tests for account state reconciliation and the payment flow, using the
// in-memory transport double and a scripted billing backend.

use crate::account::{
    AccountReconciler, PaymentAvailability, PaymentState, Product, PurchaseResult,
    VerificationResult,
};
use crate::config::{LinkConfig, ReconnectPolicy};
use crate::connection::DaemonConnection;
use crate::message::{EventKind, Message, RequestKind};
use crate::tests::support::{MemoryDaemon, MockBilling, memory_link};

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

fn test_config() -> LinkConfig {
    LinkConfig {
        payment_availability_delay_ms: 10,
        ..LinkConfig::default()
    }
}

async fn connected_link() -> (DaemonConnection, MemoryDaemon) {
    let (connector, mut daemons) = memory_link(1);
    let link = DaemonConnection::new(
        Arc::new(connector),
        ReconnectPolicy::default(),
        Vec::new(),
    );
    link.connect().await.unwrap();
    (link, daemons.remove(0))
}

fn sample_products() -> Vec<Product> {
    vec![Product {
        id: "one_month".to_string(),
        price: "$5".to_string(),
    }]
}

/// **VALUE**: Startup primes every local source: outstanding purchases are
/// verified (without surfacing a purchase result), availability is queried
/// once, and an expiry refresh is issued to the daemon.
///
/// **WHY THIS MATTERS**: Until that first query resolves the snapshot must
/// report `Loading`, never a fabricated "nothing available".
#[tokio::test]
async fn given_reconciler_spawned_then_sources_primed_and_loading_until_first_query() {
    let (link, mut daemon) = connected_link().await;
    let billing = Arc::new(
        MockBilling::new()
            .script_availability(PaymentAvailability::ProductsAvailable(sample_products())),
    );

    let reconciler = AccountReconciler::spawn(link, billing.clone(), &test_config());
    assert_eq!(reconciler.snapshot().billing_payment_state, PaymentState::Loading);

    let mut snapshots = reconciler.watch();
    let snapshot = snapshots
        .wait_for(|s| s.billing_payment_state != PaymentState::Loading)
        .await
        .unwrap()
        .clone();

    assert_eq!(
        snapshot.billing_payment_state,
        PaymentState::PaymentAvailable(sample_products())
    );
    // NothingToVerify must not surface as a purchase result.
    assert_eq!(snapshot.purchase_result, None);
    assert_eq!(billing.queries(), 1);
    assert_eq!(billing.verifications(), 1);

    // Verification always refreshes expiry, so the daemon sees one request.
    let refresh = daemon.next_request().await.unwrap();
    assert_eq!(refresh.kind, RequestKind::FetchAccountExpiry);
}

/// **VALUE**: Device and expiry events flow into one coherent snapshot, with
/// the account number redacted on the way through.
#[tokio::test]
async fn given_device_and_expiry_events_then_snapshot_combines_them() {
    let (link, daemon) = connected_link().await;
    let billing = Arc::new(MockBilling::new());
    let reconciler = AccountReconciler::spawn(link, billing, &test_config());

    daemon
        .send(Message::Event {
            kind: EventKind::DeviceState,
            payload: json!({
                "state": "logged_in",
                "device_name": "brave otter",
                "account_number": "1234567890123456",
            }),
        })
        .await;
    daemon
        .send(Message::Event {
            kind: EventKind::AccountExpiry,
            payload: json!({ "expiry": "2026-12-01T00:00:00Z" }),
        })
        .await;

    let mut snapshots = reconciler.watch();
    let snapshot = snapshots
        .wait_for(|s| s.account_expiry.is_some() && s.device_name.is_some())
        .await
        .unwrap()
        .clone();

    assert!(snapshot.daemon_available);
    assert_eq!(snapshot.device_name.as_deref(), Some("brave otter"));
    let number = snapshot.account_number.expect("account number present");
    assert_eq!(number.as_str(), "1234567890123456");
    // Redacted in debug output; the raw digits must never leak via logs.
    assert!(!format!("{number:?}").contains("1234567890123456"));
}

/// **VALUE**: A malformed event payload is ignored; the snapshot keeps its
/// previous value instead of tearing or wedging the combine task.
#[tokio::test]
async fn given_malformed_event_then_snapshot_keeps_previous_value() {
    let (link, daemon) = connected_link().await;
    let billing = Arc::new(MockBilling::new());
    let reconciler = AccountReconciler::spawn(link, billing, &test_config());

    daemon
        .send(Message::Event {
            kind: EventKind::DeviceState,
            payload: json!({ "state": "logged_in", "device_name": "brave otter",
                             "account_number": "1234567890123456" }),
        })
        .await;
    let mut snapshots = reconciler.watch();
    snapshots
        .wait_for(|s| s.device_name.is_some())
        .await
        .unwrap();

    daemon
        .send(Message::Event {
            kind: EventKind::DeviceState,
            payload: json!({ "state": "no_such_state" }),
        })
        .await;
    daemon
        .send(Message::Event {
            kind: EventKind::AccountExpiry,
            payload: json!({ "expiry": "2026-12-01T00:00:00Z" }),
        })
        .await;

    // The expiry event proves the loop advanced past the malformed payload.
    let snapshot = snapshots
        .wait_for(|s| s.account_expiry.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.device_name.as_deref(), Some("brave otter"));
}

/// **VALUE**: Losing the daemon channel degrades the snapshot (unavailable,
/// identity and expiry unknown) rather than surfacing a fault.
#[tokio::test]
async fn given_channel_lost_then_snapshot_degrades_to_unavailable() {
    let (link, mut daemon) = connected_link().await;
    let billing = Arc::new(MockBilling::new());
    let reconciler = AccountReconciler::spawn(link, billing, &test_config());

    daemon
        .send(Message::Event {
            kind: EventKind::DeviceState,
            payload: json!({ "state": "logged_in", "device_name": "brave otter",
                             "account_number": "1234567890123456" }),
        })
        .await;
    let mut snapshots = reconciler.watch();
    snapshots
        .wait_for(|s| s.daemon_available && s.device_name.is_some())
        .await
        .unwrap();

    daemon.close();

    let snapshot = snapshots
        .wait_for(|s| !s.daemon_available)
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.device_name, None);
    assert_eq!(snapshot.account_number, None);
    assert_eq!(snapshot.account_expiry, None);
}

/// **VALUE**: The full purchase flow: the result surfaces in the snapshot,
/// availability is re-queried after the configured delay, and account expiry
/// is refreshed unconditionally.
///
/// **WHY THIS MATTERS**: Purchasing changes what can be purchased and is the
/// expected way expiry moves; skipping either follow-up leaves observers on
/// pre-purchase state.
#[tokio::test]
async fn given_purchase_completed_then_availability_requeried_and_expiry_refreshed() {
    let (link, mut daemon) = connected_link().await;
    let billing = Arc::new(
        MockBilling::new()
            .script_availability(PaymentAvailability::ProductsAvailable(sample_products()))
            .script_availability(PaymentAvailability::ProductsUnavailable)
            .script_purchase(PurchaseResult::Completed),
    );
    let reconciler = AccountReconciler::spawn(link, billing.clone(), &test_config());

    // Startup refresh (from verification).
    let startup_refresh = daemon.next_request().await.unwrap();
    assert_eq!(startup_refresh.kind, RequestKind::FetchAccountExpiry);

    reconciler.purchase("one_month").await;

    assert_eq!(billing.queries(), 2, "availability re-queried after purchase");
    let post_purchase_refresh = daemon.next_request().await.unwrap();
    assert_eq!(post_purchase_refresh.kind, RequestKind::FetchAccountExpiry);

    // The combine task reads all sources per rebuild, so once the re-queried
    // availability is visible the purchase result is too.
    let mut snapshots = reconciler.watch();
    let snapshot = snapshots
        .wait_for(|s| s.billing_payment_state == PaymentState::NoPayment)
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.purchase_result, Some(PurchaseResult::Completed));
}

/// **VALUE**: The post-purchase availability re-query is actually debounced:
/// it does not fire before the configured delay has elapsed.
///
/// **WHY THIS MATTERS**: A query issued immediately after a purchase races
/// the daemon's own state and can observe the pre-purchase availability; the
/// delay exists precisely to make that query reliable.
#[tokio::test(start_paused = true)]
async fn given_purchase_completed_then_requery_waits_for_configured_delay() {
    let (link, mut daemon) = connected_link().await;
    let billing = Arc::new(MockBilling::new().script_purchase(PurchaseResult::Completed));
    let config = LinkConfig {
        payment_availability_delay_ms: 500,
        ..LinkConfig::default()
    };
    let reconciler = AccountReconciler::spawn(link, billing.clone(), &config);
    let _startup_refresh = daemon.next_request().await.unwrap();
    assert_eq!(billing.queries(), 1);

    let purchasing = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.purchase("one_month").await })
    };

    // Just short of the delay: the purchase itself has resolved, but the
    // follow-up query must still be waiting.
    tokio::time::sleep(Duration::from_millis(499)).await;
    assert_eq!(
        billing.queries(),
        1,
        "availability re-query must wait out the configured delay"
    );

    tokio::time::sleep(Duration::from_millis(2)).await;
    purchasing.await.unwrap();
    assert_eq!(billing.queries(), 2);
}

/// **VALUE**: A cancelled purchase still runs both follow-ups; "whatever the
/// outcome" includes the user backing out.
#[tokio::test]
async fn given_purchase_cancelled_then_follow_ups_still_run() {
    let (link, mut daemon) = connected_link().await;
    let billing = Arc::new(
        MockBilling::new().script_purchase(PurchaseResult::Cancelled),
    );
    let reconciler = AccountReconciler::spawn(link, billing.clone(), &test_config());
    let _startup_refresh = daemon.next_request().await.unwrap();

    reconciler.purchase("one_month").await;

    assert_eq!(billing.queries(), 2);
    let refresh = daemon.next_request().await.unwrap();
    assert_eq!(refresh.kind, RequestKind::FetchAccountExpiry);
    assert_eq!(
        reconciler.snapshot().purchase_result,
        Some(PurchaseResult::Cancelled)
    );
}

/// **VALUE**: Explicit re-verification surfaces the implied purchase result
/// and refreshes expiry either way.
#[tokio::test]
async fn given_verification_succeeds_then_purchase_result_surfaces() {
    let (link, mut daemon) = connected_link().await;
    let billing = Arc::new(
        MockBilling::new().with_verification(VerificationResult::Verified),
    );
    let reconciler = AccountReconciler::spawn(link, billing.clone(), &test_config());
    let _startup_refresh = daemon.next_request().await.unwrap();

    reconciler.verify_purchases(true).await;
    let refresh = daemon.next_request().await.unwrap();
    assert_eq!(refresh.kind, RequestKind::FetchAccountExpiry);

    let mut snapshots = reconciler.watch();
    let snapshot = snapshots
        .wait_for(|s| s.purchase_result.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.purchase_result, Some(PurchaseResult::Completed));
    assert_eq!(billing.verifications(), 2);
}

/// **VALUE**: Snapshot equality gates emission: rebuilding an identical
/// snapshot does not wake observers.
#[tokio::test]
async fn given_unchanged_sources_then_no_duplicate_snapshot_emitted() {
    let (link, daemon) = connected_link().await;
    let billing = Arc::new(MockBilling::new());
    let reconciler = AccountReconciler::spawn(link, billing, &test_config());

    // Let startup settle first so only the duplicate event is in play.
    let mut snapshots = reconciler.watch();
    snapshots
        .wait_for(|s| s.daemon_available && s.billing_payment_state != PaymentState::Loading)
        .await
        .unwrap();

    daemon
        .send(Message::Event {
            kind: EventKind::AccountExpiry,
            payload: json!({ "expiry": "2026-12-01T00:00:00Z" }),
        })
        .await;
    snapshots
        .wait_for(|s| s.account_expiry.is_some())
        .await
        .unwrap();

    // Same payload again: the rebuild produces an equal snapshot.
    daemon
        .send(Message::Event {
            kind: EventKind::AccountExpiry,
            payload: json!({ "expiry": "2026-12-01T00:00:00Z" }),
        })
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(
        !snapshots.has_changed().unwrap(),
        "equal snapshot must not be re-emitted"
    );
}
