//! # relay-core
//!
//! Session, membership, sequencing, and broadcast core of the relay
//! chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **SessionRegistry** - per-user set of live client connections
//! - **ConversationRegistry** - per-conversation set of member users
//! - **SequenceAllocator** - per-conversation monotonic message ids
//! - **BroadcastRouter** - fanout target resolution and publish
//! - **Relay** - connection lifecycle orchestration over the above
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │ Connection │────▶│       Relay       │────▶│ BroadcastRouter │
//! └────────────┘     └───────────────────┘     └─────────────────┘
//!                      │        │       │               │
//!                      ▼        ▼       ▼               ▼
//!                 Sessions  Members  Sequences       TopicBus
//! ```

pub mod auth;
pub mod broadcast;
pub mod conversation;
pub mod relay;
pub mod sequence;
pub mod session;

pub use auth::{AuthError, AuthRequest, Identity, MemorySessionStore, SessionData, SessionStore};
pub use broadcast::{BroadcastError, BroadcastRouter, DEFAULT_ACK_TIMEOUT};
pub use conversation::{ConversationId, ConversationRegistry};
pub use relay::{Relay, RelayStats};
pub use sequence::SequenceAllocator;
pub use session::{ClientConnection, ClientId, SessionRegistry, UserId};
