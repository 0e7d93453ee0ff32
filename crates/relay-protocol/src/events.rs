//! Event types for the relay wire protocol.
//!
//! Field names follow the camelCase shapes the JavaScript clients expect.

use crate::response::Response;
use serde::{Deserialize, Serialize};

/// A chat message with its assigned sequence id.
///
/// Messages are immutable once constructed; the `id` is assigned by the
/// server at broadcast time and is strictly increasing per conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Per-conversation sequence id, starting at 1.
    pub id: u64,
    /// Message body.
    pub message: String,
    /// Target conversation.
    pub conversation_id: String,
    /// Client-supplied creation timestamp (epoch milliseconds).
    pub created_at: u64,
    /// Sending user.
    pub sender_id: String,
    /// Display name of the sending user.
    pub sender_name: String,
}

/// An inbound chat message, before the server has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    /// Message body.
    pub message: String,
    /// Target conversation.
    pub conversation_id: String,
    /// Client-supplied creation timestamp (epoch milliseconds).
    pub created_at: u64,
    /// Sending user.
    pub sender_id: String,
    /// Display name of the sending user.
    pub sender_name: String,
}

impl MessageDraft {
    /// Enrich the draft with its assigned sequence id.
    #[must_use]
    pub fn into_message(self, id: u64) -> Message {
        Message {
            id,
            message: self.message,
            conversation_id: self.conversation_id,
            created_at: self.created_at,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
        }
    }
}

/// Conversation membership action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationActionKind {
    /// Join the conversation.
    Join,
    /// Leave the conversation.
    Leave,
}

/// A join/leave request for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAction {
    /// Whether to join or leave.
    pub action: ConversationActionKind,
    /// Target conversation.
    pub conversation: String,
    /// Acting user.
    pub user_id: String,
}

/// Session data echoed to a client once its connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Authenticated user id.
    pub user_id: String,
    /// Authenticated username.
    pub username: String,
    /// Session id to present on reconnect.
    pub session_id: String,
}

/// Events sent by clients to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Send a chat message.
    Message(MessageDraft),
    /// Join or leave a conversation.
    Conversation(ConversationAction),
}

/// Events sent by the server to clients.
///
/// The reply to a client `message` event carries the same shape as a
/// broadcast delivery: a `message` event wrapping the enriched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Session-established acknowledgement, or an authentication failure.
    Session(Response<SessionInfo>),
    /// A delivered chat message, or the sender's acknowledgement.
    Message(Response<Message>),
    /// Reply to a conversation join/leave request.
    Conversation(Response<crate::response::Empty>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let message = Message {
            id: 1,
            message: "hi".into(),
            conversation_id: "c1".into(),
            created_at: 1000,
            sender_id: "A".into(),
            sender_name: "Alice".into(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 1,
                "message": "hi",
                "conversationId": "c1",
                "createdAt": 1000,
                "senderId": "A",
                "senderName": "Alice",
            })
        );
    }

    #[test]
    fn test_draft_enrichment() {
        let draft = MessageDraft {
            message: "hi".into(),
            conversation_id: "c1".into(),
            created_at: 1000,
            sender_id: "A".into(),
            sender_name: "Alice".into(),
        };

        let message = draft.into_message(7);
        assert_eq!(message.id, 7);
        assert_eq!(message.conversation_id, "c1");
    }

    #[test]
    fn test_conversation_action_parse() {
        let action: ConversationAction = serde_json::from_value(json!({
            "action": "join",
            "conversation": "c1",
            "userId": "A",
        }))
        .unwrap();

        assert_eq!(action.action, ConversationActionKind::Join);
        assert_eq!(action.conversation, "c1");
        assert_eq!(action.user_id, "A");
    }

    #[test]
    fn test_client_event_envelope() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "message",
            "data": {
                "message": "hello",
                "conversationId": "c1",
                "createdAt": 1000,
                "senderId": "A",
                "senderName": "Alice",
            }
        }))
        .unwrap();

        match event {
            ClientEvent::Message(draft) => assert_eq!(draft.sender_id, "A"),
            other => panic!("Expected message event, got {:?}", other),
        }
    }
}
