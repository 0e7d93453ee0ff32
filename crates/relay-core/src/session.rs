//! Live connection tracking.
//!
//! A user owns zero or many concurrent connections (multi-device); the
//! registry maps users to their connections and is the single owner of
//! [`ClientConnection`] state.

use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// A user identifier.
pub type UserId = String;

/// A client (device/tab) identifier, unique per connection.
pub type ClientId = String;

/// One live connection instance for a user.
///
/// The transport handle is the connection's private topic, which equals
/// its client id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientConnection {
    /// Owning user.
    pub user_id: UserId,
    /// Unique client id.
    pub client_id: ClientId,
    /// Whether the connection is live.
    pub connected: bool,
}

impl ClientConnection {
    /// Create a new live connection.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, client_id: impl Into<ClientId>) -> Self {
        Self {
            user_id: user_id.into(),
            client_id: client_id.into(),
            connected: true,
        }
    }

    /// The connection's private topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.client_id
    }
}

/// Registry of live connections, keyed by user.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Connections per user (user id -> client id -> connection).
    users: DashMap<UserId, HashMap<ClientId, ClientConnection>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Idempotent per `(user_id, client_id)`;
    /// re-registering overwrites the previous entry.
    pub fn add_connection(&self, user_id: &str, client_id: &str) {
        let connection = ClientConnection::new(user_id, client_id);
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(client_id.to_string(), connection);
        debug!(user = %user_id, client = %client_id, "Connection added");
    }

    /// Remove one connection. When it was the user's last connection,
    /// the user entry itself is removed.
    ///
    /// Returns `true` if the connection was present.
    pub fn remove_connection(&self, user_id: &str, client_id: &str) -> bool {
        let removed = self
            .users
            .get_mut(user_id)
            .map(|mut connections| connections.remove(client_id).is_some())
            .unwrap_or(false);
        // Atomic: a concurrent add_connection between the removal above
        // and this cleanup must not lose the new entry.
        self.users
            .remove_if(user_id, |_, connections| connections.is_empty());

        if removed {
            debug!(user = %user_id, client = %client_id, "Connection removed");
        }
        removed
    }

    /// The user's live connections (empty if none).
    #[must_use]
    pub fn connections_of(&self, user_id: &str) -> Vec<ClientConnection> {
        self.users
            .get(user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the connection is registered and flagged connected.
    #[must_use]
    pub fn is_connected(&self, user_id: &str, client_id: &str) -> bool {
        self.users
            .get(user_id)
            .and_then(|connections| connections.get(client_id).map(|c| c.connected))
            .unwrap_or(false)
    }

    /// Flip a connection's `connected` flag off without removing it.
    pub fn mark_disconnected(&self, user_id: &str, client_id: &str) {
        if let Some(mut connections) = self.users.get_mut(user_id) {
            if let Some(connection) = connections.get_mut(client_id) {
                connection.connected = false;
            }
        }
    }

    /// Number of users with at least one connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Total number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.len()).sum()
    }
}
