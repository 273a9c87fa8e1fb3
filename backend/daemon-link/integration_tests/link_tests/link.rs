use crate::link_tests::helpers::{MockDaemon, start_mock_daemon};

use daemon_link::config::ReconnectPolicy;
use daemon_link::connection::{ConnectionState, DaemonConnection};
use daemon_link::error::LinkError;
use daemon_link::message::{EventKind, RequestKind};
use daemon_link::transport::WebSocketConnector;

use std::sync::Arc;

use serde_json::{Value, json};

fn test_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        auto_reconnect: false,
        initial_interval_ms: 20,
        max_interval_ms: 100,
        max_elapsed_ms: Some(2_000),
    }
}

async fn connected_link(daemon: &MockDaemon) -> DaemonConnection {
    let connector = WebSocketConnector::new(daemon.endpoint()).expect("valid test endpoint");
    let link = DaemonConnection::new(Arc::new(connector), test_policy(), Vec::new());
    link.connect().await.expect("connect to mock daemon");
    link
}

/// **VALUE**: Verifies the full request round trip over a real WebSocket:
/// JSON encoding, the write half, the daemon's reply, and correlation back to
/// the awaiting caller.
///
/// **WHY THIS MATTERS**: The unit tests stub the transport; this is the only
/// place where the wire encoding and the tungstenite plumbing are exercised
/// against an actual socket. If framing or the JSON shapes drift, every
/// consumer of the link breaks at once.
#[tokio::test]
async fn given_real_websocket_when_request_sent_then_response_correlates_back() {
    let mut daemon = start_mock_daemon().await;
    let link = connected_link(&daemon).await;

    let pending = link
        .send_request(RequestKind::FetchAuthToken, Value::Null)
        .await
        .expect("send over live link");

    let request = daemon.next_request().await;
    assert_eq!(request.kind, RequestKind::FetchAuthToken);
    assert_eq!(request.payload, Value::Null);

    daemon
        .respond(RequestKind::FetchAuthToken, json!({ "token": "wg-web-auth" }))
        .await;

    assert_eq!(
        pending.wait().await.unwrap(),
        json!({ "token": "wg-web-auth" })
    );
}

/// **VALUE**: Verifies the protocol contract end to end: two requests of the
/// same kind are answered strictly in submission order, and each caller gets
/// its own ordinal's response.
///
/// **WHY THIS MATTERS**: There are no request ids on the wire. The whole
/// correlation scheme rests on TCP ordering plus FIFO queues on both sides;
/// this test pins that assumption against a real socket rather than a stub.
#[tokio::test]
async fn given_two_same_kind_requests_when_answered_in_order_then_callers_get_own_response() {
    let mut daemon = start_mock_daemon().await;
    let link = connected_link(&daemon).await;

    let first = link
        .send_request(RequestKind::FetchAuthToken, Value::Null)
        .await
        .unwrap();
    let second = link
        .send_request(RequestKind::FetchAuthToken, Value::Null)
        .await
        .unwrap();

    daemon.next_request().await;
    daemon.next_request().await;

    daemon
        .respond(RequestKind::FetchAuthToken, json!({ "token": "first" }))
        .await;
    daemon
        .respond(RequestKind::FetchAuthToken, json!({ "token": "second" }))
        .await;

    assert_eq!(first.wait().await.unwrap(), json!({ "token": "first" }));
    assert_eq!(second.wait().await.unwrap(), json!({ "token": "second" }));
}

/// **VALUE**: Verifies replay-latest over the wire: an event received before
/// anyone subscribed is still observed by a late subscriber.
#[tokio::test]
async fn given_event_before_subscription_when_subscribed_then_latest_replayed() {
    let mut daemon = start_mock_daemon().await;
    let link = connected_link(&daemon).await;

    daemon
        .emit(EventKind::RelayList, json!(["se-got-001", "de-ber-002"]))
        .await;

    // A request round trip on the same stream guarantees the event (sent
    // first) has been read and published before we subscribe.
    let pending = link
        .send_request(RequestKind::FetchAuthToken, Value::Null)
        .await
        .unwrap();
    daemon.next_request().await;
    daemon.respond(RequestKind::FetchAuthToken, Value::Null).await;
    pending.wait().await.unwrap();

    let mut relays = link.subscribe(EventKind::RelayList);
    assert_eq!(
        relays.next().await,
        Some(json!(["se-got-001", "de-ber-002"]))
    );
}

/// **VALUE**: Verifies that one undecodable text frame is skipped: the next
/// valid frame still reaches its waiter and the link stays connected.
///
/// **WHY THIS MATTERS**: Frames are self-delimiting JSON, so a single bad
/// frame cannot desync the stream. Tearing the channel down for it would
/// cancel every pending request and drop all replay state over a glitch the
/// link can simply ride out.
#[tokio::test]
async fn given_undecodable_frame_when_received_then_skipped_and_link_survives() {
    let mut daemon = start_mock_daemon().await;
    let link = connected_link(&daemon).await;

    let pending = link
        .send_request(RequestKind::FetchAuthToken, Value::Null)
        .await
        .unwrap();
    daemon.next_request().await;

    daemon.send_raw("definitely not a link message").await;
    daemon
        .respond(RequestKind::FetchAuthToken, json!({ "token": "still-works" }))
        .await;

    assert_eq!(
        pending.wait().await.unwrap(),
        json!({ "token": "still-works" })
    );
    assert!(link.current_state().is_connected());
}

/// **VALUE**: Verifies the degradation path against a real socket close: the
/// pending request resolves as cancelled and the lifecycle ends Disconnected.
///
/// **WHY THIS MATTERS**: The daemon stopping (upgrade, crash) is routine. A
/// caller left awaiting forever, or a link stuck in Connected, would wedge the
/// whole client UI.
#[tokio::test]
async fn given_daemon_closes_when_request_pending_then_cancelled_and_disconnected() {
    let mut daemon = start_mock_daemon().await;
    let link = connected_link(&daemon).await;

    let pending = link
        .send_request(RequestKind::SubmitVoucher, json!({ "voucher": "AAAA-BBBB" }))
        .await
        .unwrap();
    daemon.next_request().await;

    daemon.close().await;

    assert!(matches!(
        pending.wait().await,
        Err(LinkError::RequestCancelled { .. })
    ));

    let mut state = link.state();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert!(matches!(
        link.send_request(RequestKind::FetchAuthToken, Value::Null)
            .await,
        Err(LinkError::NotConnected { .. })
    ));
}
