//! # relay-transport
//!
//! Topic-bus abstraction for the relay chat server.
//!
//! The core never assumes a specific pub/sub primitive: it addresses
//! *topics*. Every connection owns a private topic keyed by its client
//! id, and joins one topic per conversation it is a member of. Fanout
//! is a single publish addressed at a set of topics.
//!
//! ```rust,ignore
//! use relay_transport::{TopicBus, TopicHub};
//!
//! let hub = TopicHub::new();
//! let mut outbox = hub.register("client-1");
//! hub.join_topic("client-1", "c1").await?;
//! ```

pub mod hub;
pub mod traits;

pub use hub::TopicHub;
pub use traits::{
    ConnectionId, DeliveryOutcome, DeliveryStatus, TopicBus, TopicId, TransportError,
};
