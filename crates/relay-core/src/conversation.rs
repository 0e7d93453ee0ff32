//! Conversation membership tracking.
//!
//! Conversations are created lazily on first join and live for the
//! lifetime of the process; leaving never deletes them, so sequence
//! ids are never reused across membership churn.

use crate::session::UserId;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// A conversation identifier.
pub type ConversationId = String;

/// Registry of conversation member sets.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    /// Member users per conversation.
    conversations: DashMap<ConversationId, HashSet<UserId>>,
}

impl ConversationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a conversation, creating it if absent. Idempotent.
    ///
    /// Returns `true` if the user was newly added.
    pub fn join(&self, conversation_id: &str, user_id: &str) -> bool {
        let mut members = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "Creating conversation");
                HashSet::new()
            });
        let added = members.insert(user_id.to_string());
        if added {
            debug!(conversation = %conversation_id, user = %user_id, "Member joined");
        }
        added
    }

    /// Remove a user from a conversation's member set.
    ///
    /// A no-op when the conversation or the membership is absent.
    /// Returns `true` if the user was a member.
    pub fn leave(&self, conversation_id: &str, user_id: &str) -> bool {
        let removed = self
            .conversations
            .get_mut(conversation_id)
            .map(|mut members| members.remove(user_id))
            .unwrap_or(false);
        if removed {
            debug!(conversation = %conversation_id, user = %user_id, "Member left");
        }
        removed
    }

    /// The conversation's member set (empty if unknown).
    #[must_use]
    pub fn members_of(&self, conversation_id: &str) -> HashSet<UserId> {
        self.conversations
            .get(conversation_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Whether the user is a member of the conversation.
    #[must_use]
    pub fn is_member(&self, conversation_id: &str, user_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }

    /// Number of conversations created so far.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_creates_lazily() {
        let registry = ConversationRegistry::new();
        assert_eq!(registry.conversation_count(), 0);

        assert!(registry.join("c1", "A"));
        assert_eq!(registry.conversation_count(), 1);
        assert!(registry.is_member("c1", "A"));
    }

    #[test]
    fn test_join_is_idempotent() {
        let registry = ConversationRegistry::new();
        assert!(registry.join("c1", "A"));
        assert!(!registry.join("c1", "A"));

        assert_eq!(registry.members_of("c1").len(), 1);
    }

    #[test]
    fn test_leave() {
        let registry = ConversationRegistry::new();
        registry.join("c1", "A");
        registry.join("c1", "B");

        assert!(registry.leave("c1", "A"));
        assert!(!registry.is_member("c1", "A"));
        assert!(registry.is_member("c1", "B"));
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let registry = ConversationRegistry::new();
        // Unknown conversation
        assert!(!registry.leave("c1", "A"));

        // Known conversation, user never joined
        registry.join("c1", "B");
        assert!(!registry.leave("c1", "A"));
        assert_eq!(registry.members_of("c1").len(), 1);
    }

    #[test]
    fn test_empty_conversation_survives() {
        let registry = ConversationRegistry::new();
        registry.join("c1", "A");
        registry.leave("c1", "A");

        // Process-lifetime conversations: leaving the last member does
        // not delete the conversation.
        assert_eq!(registry.conversation_count(), 1);
        assert!(registry.members_of("c1").is_empty());
    }

    #[test]
    fn test_members_of_unknown_is_empty() {
        let registry = ConversationRegistry::new();
        assert!(registry.members_of("nope").is_empty());
    }
}
