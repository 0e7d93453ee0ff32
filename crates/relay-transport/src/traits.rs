//! Transport abstraction traits for the relay.
//!
//! The [`TopicBus`] trait is the seam between the membership/fanout
//! core and whatever carries the bytes, keeping the core
//! transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A topic identifier.
///
/// Private per-connection topics are keyed by client id; conversation
/// topics are keyed by conversation id.
pub type TopicId = String;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID, unique within the process.
    #[must_use]
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, seq))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is not registered with the bus.
    #[error("Connection not registered: {0}")]
    NotConnected(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Delivery timed out.
    #[error("Delivery timed out")]
    Timeout,

    /// The bus has shut down.
    #[error("Transport closed")]
    Closed,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Per-recipient result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The recipient accepted the message within the ack window.
    Delivered,
    /// The recipient did not accept the message within the ack window.
    TimedOut,
    /// The recipient's connection is gone.
    Failed,
}

/// The outcome of delivering a publish to one recipient.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Recipient connection id.
    pub target: String,
    /// How the delivery went.
    pub status: DeliveryStatus,
}

/// A topic-addressed message bus.
///
/// Connections join and leave topics; a publish is addressed at a set
/// of topics and delivered at most once to each subscribed connection,
/// never to the originating connection.
#[async_trait]
pub trait TopicBus: Send + Sync {
    /// Subscribe a connection to a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    async fn join_topic(&self, connection_id: &str, topic: &str) -> Result<(), TransportError>;

    /// Unsubscribe a connection from a topic. No-op if not subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus has shut down.
    async fn leave_topic(&self, connection_id: &str, topic: &str) -> Result<(), TransportError>;

    /// Whether a connection is currently subscribed to a topic.
    fn subscribed(&self, connection_id: &str, topic: &str) -> bool;

    /// Publish a payload to every connection subscribed to any of the
    /// addressed topics, excluding `origin`.
    ///
    /// Each recipient gets a bounded delivery window; the per-recipient
    /// outcomes are returned for the caller to log. No retries are made.
    ///
    /// # Errors
    ///
    /// Returns an error only if the publish could not be issued at all.
    async fn publish(
        &self,
        origin: &str,
        topics: &HashSet<TopicId>,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Vec<DeliveryOutcome>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }
}
