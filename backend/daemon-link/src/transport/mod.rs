//! The opaque bidirectional channel to the daemon process.
//!
//! The link layer does not care how bytes reach the daemon. It talks to a pair
//! of object-safe halves produced by a [`DaemonConnector`]: one outbound
//! ([`RequestSender`]), one inbound ([`MessageReceiver`]). The production
//! implementation is a localhost WebSocket (see [`websocket`]); tests substitute
//! in-memory halves.
//!
//! # Channel closure
//!
//! A closed channel is a distinguishable signal, not a generic error:
//! [`MessageReceiver::recv`] returns `Ok(None)`. The lifecycle treats it as a
//! disconnect; transport faults (`Err`) are treated the same way but logged
//! louder.

pub mod websocket;

pub use websocket::WebSocketConnector;

use crate::error::LinkError;
use crate::message::{Message, Request};

use async_trait::async_trait;

/// Outbound half of the channel.
#[async_trait]
pub trait RequestSender: Send {
    async fn send(&mut self, request: Request) -> Result<(), LinkError>;
}

/// Inbound half of the channel. Single consumer, delivery order preserved
/// exactly; no reordering or de-duplication happens here.
#[async_trait]
pub trait MessageReceiver: Send {
    /// Next inbound message. `Ok(None)` means the daemon closed the channel.
    async fn recv(&mut self) -> Result<Option<Message>, LinkError>;
}

pub type BoxedSender = Box<dyn RequestSender>;
pub type BoxedReceiver = Box<dyn MessageReceiver>;

/// Dials the daemon and hands back the two channel halves.
#[async_trait]
pub trait DaemonConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<(BoxedSender, BoxedReceiver), LinkError>;
}
