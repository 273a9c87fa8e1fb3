//! Wire model for the client-to-daemon channel.
//!
//! Everything that crosses the channel is a tagged message: a kind that drives
//! routing plus an opaque JSON payload. The link layer never inspects payloads;
//! decoding them into domain types is the consumer's job (see `account`).
//!
//! # Routing
//!
//! - [`Message::Response`] items are correlated back to an in-flight request of
//!   the same [`RequestKind`] (see `correlator`).
//! - [`Message::Event`] items are fanned out to subscribers of that
//!   [`EventKind`] (see `dispatcher`).
//!
//! Cross-kind ordering is irrelevant; same-kind ordering is load-bearing and
//! preserved end to end.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator for outbound requests and their responses.
///
/// The daemon answers requests of a given kind strictly in submission order.
/// That protocol contract is what allows response correlation without explicit
/// request ids (see [`crate::correlator::RequestCorrelator`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Fetch a one-time web auth token. Correlated: answered by a
    /// `Response(FetchAuthToken)`.
    FetchAuthToken,
    /// Redeem a time voucher. Correlated: answered by a
    /// `Response(SubmitVoucher)`.
    SubmitVoucher,
    /// Ask the daemon to publish a fresh `AccountExpiry` event.
    FetchAccountExpiry,
    /// Ask the daemon to publish a fresh `DeviceState` event.
    FetchDeviceState,
    /// Ask the daemon to publish a fresh `RelayList` event.
    FetchRelayList,
    /// Ask the daemon to publish a fresh `Settings` event.
    FetchSettings,
    /// Update relay constraints. The daemon acknowledges indirectly with a
    /// `Settings` event.
    SetRelaySettings,
}

/// Discriminator for unsolicited events from the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Current tunnel state (connected/disconnected/error).
    TunnelState,
    /// Logged-in device identity.
    DeviceState,
    /// Account expiry timestamp.
    AccountExpiry,
    /// Available relay servers.
    RelayList,
    /// Daemon settings.
    Settings,
    /// One-shot notice (non-fatal daemon problem, version warning, ...).
    DaemonNotice,
}

/// Replay semantics of an event kind, declared explicitly per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// The event represents a *state*: a late subscriber immediately observes
    /// the most recent value (until a disconnect marks it stale).
    Latest,
    /// The event represents a *transient occurrence*: nothing is observed
    /// retroactively.
    None,
}

impl EventKind {
    /// Every kind the dispatcher must carry a channel for.
    pub const ALL: [EventKind; 6] = [
        EventKind::TunnelState,
        EventKind::DeviceState,
        EventKind::AccountExpiry,
        EventKind::RelayList,
        EventKind::Settings,
        EventKind::DaemonNotice,
    ];

    /// Whether a late subscriber sees the latest known value.
    pub fn replay(self) -> Replay {
        match self {
            EventKind::TunnelState
            | EventKind::DeviceState
            | EventKind::AccountExpiry
            | EventKind::RelayList
            | EventKind::Settings => Replay::Latest,
            EventKind::DaemonNotice => Replay::None,
        }
    }
}

/// A single inbound item from the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Answer to a previously sent request of the same kind.
    Response { kind: RequestKind, payload: Value },
    /// Unsolicited state or occurrence.
    Event { kind: EventKind, payload: Value },
}

/// A single outbound item to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub kind: RequestKind,
    pub payload: Value,
}

impl Request {
    pub fn new(kind: RequestKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// A request whose payload carries no information.
    pub fn empty(kind: RequestKind) -> Self {
        Self {
            kind,
            payload: Value::Null,
        }
    }
}
