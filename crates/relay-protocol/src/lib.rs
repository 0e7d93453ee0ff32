//! # relay-protocol
//!
//! Wire-level types for the relay chat server.
//!
//! Every event travelling between clients and the server is a JSON
//! envelope tagged with its event name:
//!
//! - `message` - chat messages, inbound (draft) and outbound (enriched)
//! - `conversation` - join/leave membership actions
//! - `session` - session-established acknowledgement
//!
//! Replies to client requests use the [`Response`] envelope:
//! `{ "success": true, "data": ... }` on success,
//! `{ "success": false, "status": ..., "message": ... }` on failure.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, ClientEvent};
//!
//! let text = r#"{"event":"conversation","data":{"action":"join","conversation":"c1","userId":"A"}}"#;
//! let event = codec::decode(text).unwrap();
//! assert!(matches!(event, ClientEvent::Conversation(_)));
//! ```

pub mod codec;
pub mod events;
pub mod response;

pub use codec::{decode, encode, ProtocolError};
pub use events::{
    ClientEvent, ConversationAction, ConversationActionKind, Message, MessageDraft, ServerEvent,
    SessionInfo,
};
pub use response::{Empty, Response};
