//! Identity resolution and session persistence.
//!
//! Connecting clients either present a session id from a previous
//! connection, or supply a user id and username and get a fresh session
//! minted for them. Neither resolving means the connection is rejected
//! before registration.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use relay_transport::ConnectionId;

/// A resolved user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User id.
    pub user_id: String,
    /// Display name.
    pub username: String,
}

/// Session persistence collaborator.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up the identity bound to a session id.
    async fn find_session(&self, session_id: &str) -> Option<Identity>;

    /// Bind an identity to a session id.
    async fn save_session(&self, session_id: &str, identity: Identity);

    /// Forget a session.
    async fn delete_session(&self, session_id: &str);

    /// All stored identities.
    async fn all_sessions(&self) -> Vec<Identity>;
}

/// In-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Identity>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_session(&self, session_id: &str) -> Option<Identity> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    async fn save_session(&self, session_id: &str, identity: Identity) {
        self.sessions.insert(session_id.to_string(), identity);
    }

    async fn delete_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    async fn all_sessions(&self) -> Vec<Identity> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No resolvable session and no valid supplied identity.
    #[error("invalid username or userId")]
    Unauthenticated,
}

impl AuthError {
    /// HTTP-style status code for the error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            AuthError::Unauthenticated => 401,
        }
    }
}

/// Raw auth material presented by a connecting client.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Session id from a previous connection, if any.
    pub session_id: Option<String>,
    /// Supplied user id.
    pub user_id: Option<String>,
    /// Supplied username.
    pub username: Option<String>,
    /// Supplied client id; generated when absent.
    pub client_id: Option<String>,
}

/// A resolved connection identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    /// Session id (existing or freshly minted).
    pub session_id: String,
    /// Authenticated user id.
    pub user_id: String,
    /// Authenticated username.
    pub username: String,
    /// This connection's client id.
    pub client_id: String,
}

/// Generate a fresh session id.
#[must_use]
pub fn generate_session_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("sess_{:x}", timestamp)
}

fn supplied(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Resolve a connecting client's identity.
///
/// An existing session wins over supplied identity; a supplied identity
/// mints and saves a fresh session.
///
/// # Errors
///
/// Returns [`AuthError::Unauthenticated`] when neither resolves.
pub async fn authenticate(
    store: &dyn SessionStore,
    request: AuthRequest,
) -> Result<SessionData, AuthError> {
    let client_id = supplied(request.client_id)
        .unwrap_or_else(|| ConnectionId::generate().to_string());

    if let Some(session_id) = supplied(request.session_id) {
        if let Some(identity) = store.find_session(&session_id).await {
            debug!(session = %session_id, user = %identity.user_id, "Session resumed");
            return Ok(SessionData {
                session_id,
                user_id: identity.user_id,
                username: identity.username,
                client_id,
            });
        }
    }

    let (Some(user_id), Some(username)) =
        (supplied(request.user_id), supplied(request.username))
    else {
        return Err(AuthError::Unauthenticated);
    };

    let session_id = generate_session_id();
    store
        .save_session(
            &session_id,
            Identity {
                user_id: user_id.clone(),
                username: username.clone(),
            },
        )
        .await;
    debug!(session = %session_id, user = %user_id, "Session created");

    Ok(SessionData {
        session_id,
        user_id,
        username,
        client_id,
    })
}
