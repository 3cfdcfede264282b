//! Hexagonal ports the sync engine talks through.
//!
//! REST and push adapters live in `whispry-http` and `whispry-stomp`; tests use
//! in-memory fakes.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    domain::{ConnectionState, SubscriptionId, UserId},
    message::OutgoingMessage,
    session::Session,
    Result,
};

/// Authenticated read of a conversation's backlog.
#[async_trait]
pub trait HistoryClient: Send + Sync {
    /// Raw records exchanged with `peer`, in server order.
    async fn fetch_history(&self, session: &Session, peer: &UserId) -> Result<Vec<Value>>;
}

/// Authenticated REST write of one message (push fallback).
#[async_trait]
pub trait SendClient: Send + Sync {
    /// Returns the server's record of the stored message.
    async fn send_message(&self, session: &Session, msg: &OutgoingMessage) -> Result<Value>;
}

/// Event emitted by a push transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushEvent {
    /// Handshake completed; subscriptions must be (re)created.
    Connected,
    /// A message delivered to one of our subscriptions.
    Message { body: String },
    /// Protocol-level error frame from the broker.
    ProtocolError { message: String },
    /// Connection lost; the transport reconnects on its own schedule.
    Disconnected { reason: String },
}

/// A [`PushEvent`] stamped with the connection epoch that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushDelivery {
    pub epoch: u64,
    pub event: PushEvent,
}

/// Publish/subscribe transport.
///
/// Implementations own reconnection: after any close they go back to
/// `Disconnected`, retry after a fixed delay forever, and emit
/// [`PushEvent::Connected`] again on every successful handshake. Subscriptions
/// do not survive a reconnect.
#[async_trait]
pub trait PushChannel: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Counter bumped by every `connect` and `disconnect`. Deliveries stamped
    /// with any other value come from a released connection.
    fn epoch(&self) -> u64;

    /// Start (or restart) the connection loop for `session`.
    async fn connect(&self, session: &Session) -> Result<()>;

    /// Stop the connection loop and release the socket.
    async fn disconnect(&self) -> Result<()>;

    async fn subscribe(&self, destination: &str) -> Result<SubscriptionId>;

    async fn publish(&self, destination: &str, body: &str) -> Result<()>;
}
