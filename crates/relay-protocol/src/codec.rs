//! Codec for encoding and decoding relay events.
//!
//! Events are JSON text; this module adds a size guard on top of
//! `serde_json` in both directions.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum encoded event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("Invalid event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a server event to JSON text.
///
/// # Errors
///
/// Returns an error if the event is too large or serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a client event from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid event.
pub fn decode(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}
