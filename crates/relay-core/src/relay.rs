//! Connection lifecycle orchestration.
//!
//! [`Relay`] composes the registries, the sequence allocator, and the
//! broadcast router, and handles the four connection events: connect,
//! conversation join/leave, message, disconnect. No error escapes an
//! event handler; every caller-facing operation returns a structured
//! [`Response`].

use crate::auth::{self, AuthError, AuthRequest, SessionData, SessionStore};
use crate::broadcast::BroadcastRouter;
use crate::conversation::ConversationRegistry;
use crate::sequence::SequenceAllocator;
use crate::session::SessionRegistry;
use relay_protocol::{
    ConversationAction, ConversationActionKind, Empty, Message, MessageDraft, Response,
};
use relay_transport::{TopicBus, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of relay state for health and metrics reporting.
#[derive(Debug, Clone, Copy)]
pub struct RelayStats {
    /// Users with at least one live connection.
    pub users: usize,
    /// Total live connections.
    pub connections: usize,
    /// Conversations created so far.
    pub conversations: usize,
}

/// The connection lifecycle handler.
pub struct Relay {
    sessions: SessionRegistry,
    conversations: ConversationRegistry,
    sequences: SequenceAllocator,
    router: BroadcastRouter,
    bus: Arc<dyn TopicBus>,
    store: Arc<dyn SessionStore>,
}

impl Relay {
    /// Create a relay with the default acknowledgement window.
    #[must_use]
    pub fn new(bus: Arc<dyn TopicBus>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_ack_timeout(bus, store, crate::broadcast::DEFAULT_ACK_TIMEOUT)
    }

    /// Create a relay with a specific broadcast acknowledgement window.
    #[must_use]
    pub fn with_ack_timeout(
        bus: Arc<dyn TopicBus>,
        store: Arc<dyn SessionStore>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            conversations: ConversationRegistry::new(),
            sequences: SequenceAllocator::new(),
            router: BroadcastRouter::with_ack_timeout(Arc::clone(&bus), ack_timeout),
            bus,
            store,
        }
    }

    /// Resolve a connecting client's identity via the session store.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] when no session resolves
    /// and no valid identity was supplied; the connection must be
    /// rejected before registration.
    pub async fn authenticate(&self, request: AuthRequest) -> Result<SessionData, AuthError> {
        auth::authenticate(self.store.as_ref(), request).await
    }

    /// Register an authenticated connection and subscribe it to its
    /// private topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the private topic subscription fails; the
    /// connection is not registered in that case.
    pub async fn connect(&self, session: &SessionData) -> Result<(), TransportError> {
        // Private topic keyed by the connection's own client id.
        self.bus
            .join_topic(&session.client_id, &session.client_id)
            .await?;
        self.sessions
            .add_connection(&session.user_id, &session.client_id);
        info!(
            user = %session.user_id,
            client = %session.client_id,
            "Client connected"
        );
        Ok(())
    }

    /// Handle a conversation join/leave action.
    ///
    /// Failures are caught here and reported as a status-500 response,
    /// never propagated.
    pub async fn conversation(
        &self,
        session: &SessionData,
        action: &ConversationAction,
    ) -> Response<Empty> {
        let result = match action.action {
            ConversationActionKind::Join => {
                self.join_conversation(&session.client_id, &action.conversation, &action.user_id)
                    .await
            }
            ConversationActionKind::Leave => {
                self.leave_conversation(&session.client_id, &action.conversation, &action.user_id)
                    .await
            }
        };

        match result {
            Ok(()) => Response::ok(Empty {}),
            Err(e) => {
                warn!(
                    conversation = %action.conversation,
                    user = %action.user_id,
                    error = %e,
                    "Conversation action failed"
                );
                Response::error(500, e.to_string())
            }
        }
    }

    /// Handle an inbound message.
    ///
    /// A sender not yet subscribed to the conversation topic is
    /// auto-joined first. The acknowledgement carries the enriched
    /// message and reports success as soon as the broadcast is
    /// dispatched; it makes no delivery guarantee.
    pub async fn message(&self, session: &SessionData, draft: MessageDraft) -> Response<Message> {
        let conversation_id = draft.conversation_id.clone();

        if !self.bus.subscribed(&session.client_id, &conversation_id) {
            debug!(conversation = %conversation_id, sender = %draft.sender_id, "Auto-joining sender");
            if let Err(e) = self
                .join_conversation(&session.client_id, &conversation_id, &draft.sender_id)
                .await
            {
                warn!(conversation = %conversation_id, error = %e, "Auto-join failed");
                return Response::error(500, e.to_string());
            }
        }

        // Sequence assignment happens-before the publish and is never
        // split across a suspension point.
        let id = self.sequences.next(&conversation_id);
        let message = draft.into_message(id);

        match self
            .router
            .broadcast(
                &self.sessions,
                &self.conversations,
                &session.client_id,
                &message,
            )
            .await
        {
            Ok(recipients) => {
                debug!(
                    conversation = %conversation_id,
                    id = message.id,
                    recipients,
                    "Message broadcast"
                );
                Response::ok(message)
            }
            Err(e) => {
                warn!(conversation = %conversation_id, id = message.id, error = %e, "Broadcast failed");
                Response::error(500, e.to_string())
            }
        }
    }

    /// Handle a disconnect.
    ///
    /// Only the disconnecting connection is removed; the user's other
    /// devices stay registered.
    pub async fn disconnect(&self, session: &SessionData) {
        self.sessions
            .remove_connection(&session.user_id, &session.client_id);
        if let Err(e) = self
            .bus
            .leave_topic(&session.client_id, &session.client_id)
            .await
        {
            warn!(client = %session.client_id, error = %e, "Private topic teardown failed");
        }
        info!(
            user = %session.user_id,
            client = %session.client_id,
            "Client disconnected"
        );
    }

    /// Current relay state.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            users: self.sessions.user_count(),
            connections: self.sessions.connection_count(),
            conversations: self.conversations.conversation_count(),
        }
    }

    async fn join_conversation(
        &self,
        client_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), TransportError> {
        self.conversations.join(conversation_id, user_id);
        self.bus.join_topic(client_id, conversation_id).await
    }

    async fn leave_conversation(
        &self,
        client_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), TransportError> {
        self.bus.leave_topic(client_id, conversation_id).await?;
        self.conversations.leave(conversation_id, user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use relay_transport::TopicHub;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Harness {
        hub: Arc<TopicHub>,
        relay: Relay,
    }

    impl Harness {
        fn new() -> Self {
            let hub = Arc::new(TopicHub::new());
            let store = Arc::new(MemorySessionStore::new());
            let relay = Relay::new(hub.clone(), store);
            Self { hub, relay }
        }

        /// Connect a client, returning its session and outbox.
        async fn connect(&self, user: &str, client: &str) -> (SessionData, mpsc::Receiver<bytes::Bytes>) {
            let outbox = self.hub.register(client);
            let session = self
                .relay
                .authenticate(AuthRequest {
                    user_id: Some(user.into()),
                    username: Some(format!("{user}-name")),
                    client_id: Some(client.into()),
                    ..AuthRequest::default()
                })
                .await
                .unwrap();
            self.relay.connect(&session).await.unwrap();
            (session, outbox)
        }
    }

    fn draft(conversation: &str, sender: &str, body: &str) -> MessageDraft {
        MessageDraft {
            message: body.into(),
            conversation_id: conversation.into(),
            created_at: 1000,
            sender_id: sender.into(),
            sender_name: format!("{sender}-name"),
        }
    }

    fn join(conversation: &str, user: &str) -> ConversationAction {
        ConversationAction {
            action: ConversationActionKind::Join,
            conversation: conversation.into(),
            user_id: user.into(),
        }
    }

    async fn recv_text(outbox: &mut mpsc::Receiver<bytes::Bytes>) -> String {
        let payload = timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("outbox closed");
        String::from_utf8(payload.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_connect_rejected() {
        let harness = Harness::new();
        let result = harness.relay.authenticate(AuthRequest::default()).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
        assert_eq!(harness.relay.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_first_message_auto_joins_and_acks_id_one() {
        let harness = Harness::new();
        let (session, mut outbox) = harness.connect("A", "A1").await;

        let response = harness
            .relay
            .message(&session, draft("c1", "A", "hi"))
            .await;

        // Sender is auto-joined; ack succeeds with id 1; no broadcast
        // occurs since there are no other members.
        let message = response.data().expect("expected success ack");
        assert_eq!(message.id, 1);
        assert!(harness.relay.stats().conversations == 1);
        assert!(harness.hub.subscribed("A1", "c1"));
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_two_member_fanout_and_sequencing() {
        let harness = Harness::new();
        let (a_session, mut a1) = harness.connect("A", "A1").await;
        let (b_session, mut b1) = harness.connect("B", "B1").await;

        assert!(harness.relay.conversation(&a_session, &join("c1", "A")).await.is_success());
        assert!(harness.relay.conversation(&b_session, &join("c1", "B")).await.is_success());

        let first = harness.relay.message(&a_session, draft("c1", "A", "one")).await;
        assert_eq!(first.data().unwrap().id, 1);

        let text = recv_text(&mut b1).await;
        assert!(text.contains(r#""success":true"#));
        assert!(text.contains(r#""id":1"#));
        assert!(text.contains(r#""senderId":"A""#));

        let second = harness.relay.message(&a_session, draft("c1", "A", "two")).await;
        assert_eq!(second.data().unwrap().id, 2);

        let text = recv_text(&mut b1).await;
        assert!(text.contains(r#""id":2"#));

        // The sender's own connection never receives its message
        assert!(a1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multi_device_echo() {
        let harness = Harness::new();
        let (a1_session, mut a1) = harness.connect("A", "A1").await;
        let (a2_session, mut a2) = harness.connect("A", "A2").await;
        let (b_session, mut b1) = harness.connect("B", "B1").await;

        harness.relay.conversation(&a1_session, &join("c1", "A")).await;
        harness.relay.conversation(&a2_session, &join("c1", "A")).await;
        harness.relay.conversation(&b_session, &join("c1", "B")).await;

        let response = harness.relay.message(&a1_session, draft("c1", "A", "hi")).await;
        assert!(response.is_success());

        // Delivery targets are exactly {A2, B1}
        assert!(recv_text(&mut a2).await.contains(r#""id":1"#));
        assert!(recv_text(&mut b1).await.contains(r#""id":1"#));
        assert!(a1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_stops_membership() {
        let harness = Harness::new();
        let (a_session, _a1) = harness.connect("A", "A1").await;
        let (b_session, mut b1) = harness.connect("B", "B1").await;

        harness.relay.conversation(&a_session, &join("c1", "A")).await;
        harness.relay.conversation(&b_session, &join("c1", "B")).await;

        let leave = ConversationAction {
            action: ConversationActionKind::Leave,
            conversation: "c1".into(),
            user_id: "B".into(),
        };
        assert!(harness.relay.conversation(&b_session, &leave).await.is_success());

        let response = harness.relay.message(&a_session, draft("c1", "A", "hi")).await;
        assert!(response.is_success());
        // B left; nothing is delivered to B1. Give the detached publish
        // a chance to run before asserting.
        tokio::task::yield_now().await;
        assert!(b1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_conversation_action_failure_is_status_500() {
        let harness = Harness::new();
        // Authenticated but never registered with the hub, so the
        // topic join fails inside the handler.
        let session = harness
            .relay
            .authenticate(AuthRequest {
                user_id: Some("A".into()),
                username: Some("A-name".into()),
                client_id: Some("A1".into()),
                ..AuthRequest::default()
            })
            .await
            .unwrap();

        let response = harness.relay.conversation(&session, &join("c1", "A")).await;
        match response {
            Response::Error { status, .. } => assert_eq!(status, 500),
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_never_joined_is_success() {
        let harness = Harness::new();
        let (session, _outbox) = harness.connect("A", "A1").await;

        let leave = ConversationAction {
            action: ConversationActionKind::Leave,
            conversation: "never-joined".into(),
            user_id: "A".into(),
        };
        assert!(harness.relay.conversation(&session, &leave).await.is_success());
    }

    #[tokio::test]
    async fn test_auto_join_receives_future_messages() {
        let harness = Harness::new();
        let (a_session, mut a1) = harness.connect("A", "A1").await;
        let (b_session, mut b1) = harness.connect("B", "B1").await;

        // B joins explicitly; A joins implicitly by sending.
        harness.relay.conversation(&b_session, &join("c1", "B")).await;
        harness.relay.message(&a_session, draft("c1", "A", "first")).await;
        assert!(recv_text(&mut b1).await.contains(r#""id":1"#));

        // Now B sends; A is a member from the auto-join and receives it.
        let response = harness.relay.message(&b_session, draft("c1", "B", "second")).await;
        assert_eq!(response.data().unwrap().id, 2);
        assert!(recv_text(&mut a1).await.contains(r#""id":2"#));
    }

    #[tokio::test]
    async fn test_disconnect_removes_only_one_device() {
        let harness = Harness::new();
        let (a1_session, _a1) = harness.connect("A", "A1").await;
        let (_a2_session, _a2) = harness.connect("A", "A2").await;

        harness.relay.disconnect(&a1_session).await;

        let stats = harness.relay.stats();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.connections, 1);
        assert!(!harness.hub.subscribed("A1", "A1"));
    }

    #[tokio::test]
    async fn test_broadcast_payload_is_a_message_event() {
        let harness = Harness::new();
        let (a_session, _a1) = harness.connect("A", "A1").await;
        let (b_session, mut b1) = harness.connect("B", "B1").await;

        harness.relay.conversation(&a_session, &join("c1", "A")).await;
        harness.relay.conversation(&b_session, &join("c1", "B")).await;
        harness.relay.message(&a_session, draft("c1", "A", "hi")).await;

        let text = recv_text(&mut b1).await;
        assert!(text.starts_with(r#"{"event":"message""#));
        assert!(text.contains(r#""success":true"#));
        assert!(text.contains(r#""message":"hi""#));
    }
}
