//! Fanout target resolution and publish.
//!
//! Given an enriched message, the router resolves every destination
//! connection - all of every other member's connections, plus the
//! sender's own other connections - and issues one publish addressed at
//! all of their private topics.

use crate::conversation::ConversationRegistry;
use crate::session::{ClientId, SessionRegistry};
use bytes::Bytes;
use relay_protocol::{codec, Message, ProtocolError, Response, ServerEvent};
use relay_transport::{DeliveryStatus, TopicBus, TransportError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Acknowledgement window for per-recipient delivery.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Broadcast errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The sender has no live connections at publish time; should not
    /// occur under correct lifecycle handling.
    #[error("Sender {0} has no live connections")]
    SenderUnknown(String),

    /// The originating connection is not flagged connected.
    #[error("Originating connection {0} is not connected")]
    SenderNotConnected(String),

    /// The message could not be encoded for the wire.
    #[error("Encode failed: {0}")]
    Encode(#[from] ProtocolError),

    /// The publish could not be issued.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Computes fanout targets and publishes via the topic bus.
pub struct BroadcastRouter {
    bus: Arc<dyn TopicBus>,
    ack_timeout: Duration,
}

impl BroadcastRouter {
    /// Create a router with the default acknowledgement window.
    #[must_use]
    pub fn new(bus: Arc<dyn TopicBus>) -> Self {
        Self::with_ack_timeout(bus, DEFAULT_ACK_TIMEOUT)
    }

    /// Create a router with a specific acknowledgement window.
    #[must_use]
    pub fn with_ack_timeout(bus: Arc<dyn TopicBus>, ack_timeout: Duration) -> Self {
        Self { bus, ack_timeout }
    }

    /// Resolve every destination connection for a message.
    ///
    /// Every member's every connection is a target, except the sender's
    /// originating connection: the sender's *other* connections still
    /// receive the message (multi-device echo).
    #[must_use]
    pub fn resolve_targets(
        sessions: &SessionRegistry,
        conversations: &ConversationRegistry,
        message: &Message,
        origin_client: &str,
    ) -> HashSet<ClientId> {
        let members = conversations.members_of(&message.conversation_id);
        let mut targets = HashSet::new();

        for user in members.iter().filter(|user| *user != &message.sender_id) {
            for connection in sessions.connections_of(user) {
                targets.insert(connection.client_id);
            }
        }
        for connection in sessions.connections_of(&message.sender_id) {
            if connection.client_id != origin_client {
                targets.insert(connection.client_id);
            }
        }

        targets
    }

    /// Publish a message to all of its destination connections.
    ///
    /// Returns the number of targets once the publish is dispatched;
    /// per-recipient delivery runs detached, with timeouts and failures
    /// logged but never retried or surfaced to the sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender has no live connections or the
    /// originating connection is not flagged connected.
    pub async fn broadcast(
        &self,
        sessions: &SessionRegistry,
        conversations: &ConversationRegistry,
        origin_client: &str,
        message: &Message,
    ) -> Result<usize, BroadcastError> {
        let targets = Self::resolve_targets(sessions, conversations, message, origin_client);
        if targets.is_empty() {
            debug!(
                conversation = %message.conversation_id,
                sender = %message.sender_id,
                "No broadcast targets"
            );
            return Ok(0);
        }

        if sessions.connections_of(&message.sender_id).is_empty() {
            return Err(BroadcastError::SenderUnknown(message.sender_id.clone()));
        }
        if !sessions.is_connected(&message.sender_id, origin_client) {
            return Err(BroadcastError::SenderNotConnected(
                origin_client.to_string(),
            ));
        }

        let event = ServerEvent::Message(Response::ok(message.clone()));
        let payload = Bytes::from(codec::encode(&event)?);

        debug!(
            conversation = %message.conversation_id,
            id = message.id,
            targets = targets.len(),
            "Broadcasting message"
        );

        let bus = Arc::clone(&self.bus);
        let ack_timeout = self.ack_timeout;
        let origin = origin_client.to_string();
        let conversation = message.conversation_id.clone();
        let count = targets.len();

        // Delivery is fire-and-forget beyond logging; the sender's ack
        // reflects "message was broadcast", not "message was received".
        tokio::spawn(async move {
            match bus.publish(&origin, &targets, payload, ack_timeout).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome.status {
                            DeliveryStatus::Delivered => {}
                            DeliveryStatus::TimedOut => warn!(
                                conversation = %conversation,
                                target = %outcome.target,
                                "Delivery ack timed out"
                            ),
                            DeliveryStatus::Failed => warn!(
                                conversation = %conversation,
                                target = %outcome.target,
                                "Delivery failed"
                            ),
                        }
                    }
                }
                Err(e) => {
                    warn!(conversation = %conversation, error = %e, "Broadcast publish failed");
                }
            }
        });

        Ok(count)
    }
}
