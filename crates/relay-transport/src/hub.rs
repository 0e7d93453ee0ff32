//! In-process topic hub.
//!
//! Each registered connection gets an mpsc outbox; the owning task
//! (typically a WebSocket pump) drains it. Publishes resolve the
//! addressed topics to connections and push into each outbox with a
//! bounded delivery window.

use crate::traits::{DeliveryOutcome, DeliveryStatus, TopicBus, TopicId, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, trace};

/// Default outbox capacity per connection.
const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// An in-process [`TopicBus`] backed by per-connection mpsc queues.
pub struct TopicHub {
    /// Topic membership (topic -> connection ids).
    topics: DashMap<TopicId, DashSet<String>>,
    /// Reverse index (connection id -> topics).
    memberships: DashMap<String, DashSet<TopicId>>,
    /// Per-connection outboxes.
    outboxes: DashMap<String, mpsc::Sender<Bytes>>,
    /// Outbox capacity for newly registered connections.
    capacity: usize,
}

impl TopicHub {
    /// Create a hub with the default outbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    /// Create a hub with a specific outbox capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            memberships: DashMap::new(),
            outboxes: DashMap::new(),
            capacity,
        }
    }

    /// Register a connection, returning its outbox receiver.
    ///
    /// Re-registering the same connection id replaces the outbox; the
    /// previous receiver closes.
    pub fn register(&self, connection_id: &str) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.insert(connection_id.to_string(), tx);
        debug!(connection = %connection_id, "Connection registered");
        rx
    }

    /// Remove a connection and all of its topic memberships.
    pub fn unregister(&self, connection_id: &str) {
        self.outboxes.remove(connection_id);
        if let Some((_, topics)) = self.memberships.remove(connection_id) {
            for topic in topics.iter() {
                if let Some(members) = self.topics.get(topic.as_str()) {
                    members.remove(connection_id);
                }
                self.topics.remove_if(topic.as_str(), |_, members| members.is_empty());
            }
        }
        debug!(connection = %connection_id, "Connection unregistered");
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.outboxes.contains_key(connection_id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Number of topics with at least one subscriber.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Resolve the connections subscribed to any of the given topics,
    /// excluding the origin.
    fn resolve_recipients(&self, origin: &str, topics: &HashSet<TopicId>) -> HashSet<String> {
        let mut recipients = HashSet::new();
        for topic in topics {
            if let Some(members) = self.topics.get(topic) {
                for member in members.iter() {
                    if member.as_str() != origin {
                        recipients.insert(member.clone());
                    }
                }
            }
        }
        recipients
    }
}

impl Default for TopicHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TopicBus for TopicHub {
    async fn join_topic(&self, connection_id: &str, topic: &str) -> Result<(), TransportError> {
        if !self.outboxes.contains_key(connection_id) {
            return Err(TransportError::NotConnected(connection_id.to_string()));
        }

        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.to_string());
        self.memberships
            .entry(connection_id.to_string())
            .or_default()
            .insert(topic.to_string());

        debug!(connection = %connection_id, topic = %topic, "Joined topic");
        Ok(())
    }

    async fn leave_topic(&self, connection_id: &str, topic: &str) -> Result<(), TransportError> {
        if let Some(members) = self.topics.get(topic) {
            members.remove(connection_id);
        }
        self.topics.remove_if(topic, |_, members| members.is_empty());
        if let Some(topics) = self.memberships.get(connection_id) {
            topics.remove(topic);
        }

        debug!(connection = %connection_id, topic = %topic, "Left topic");
        Ok(())
    }

    fn subscribed(&self, connection_id: &str, topic: &str) -> bool {
        self.memberships
            .get(connection_id)
            .map(|topics| topics.contains(topic))
            .unwrap_or(false)
    }

    async fn publish(
        &self,
        origin: &str,
        topics: &HashSet<TopicId>,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Vec<DeliveryOutcome>, TransportError> {
        let recipients = self.resolve_recipients(origin, topics);
        trace!(origin = %origin, recipients = recipients.len(), "Publishing");

        let sends = recipients.into_iter().map(|target| {
            let payload = payload.clone();
            // Clone the sender out so no map lock is held across the await.
            let outbox = self.outboxes.get(&target).map(|tx| tx.value().clone());
            async move {
                let status = match outbox {
                    Some(tx) => match tx.send_timeout(payload, timeout).await {
                        Ok(()) => DeliveryStatus::Delivered,
                        Err(SendTimeoutError::Timeout(_)) => DeliveryStatus::TimedOut,
                        Err(SendTimeoutError::Closed(_)) => DeliveryStatus::Failed,
                    },
                    None => DeliveryStatus::Failed,
                };
                DeliveryOutcome { target, status }
            }
        });

        Ok(join_all(sends).await)
    }
}
