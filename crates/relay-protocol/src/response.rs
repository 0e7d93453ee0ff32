//! Request/response envelope for per-call acknowledgements.

use serde::{Deserialize, Serialize};

/// An empty payload, serialized as `{}`.
///
/// Used for acknowledgements that carry no data, matching the wire
/// shape `{ "success": true, "data": {} }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// A structured success/failure reply.
///
/// Success form: `{ "success": true, "data": T }`.
/// Error form: `{ "success": false, "status": u16, "message": String }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response<T> {
    /// The operation succeeded.
    Success {
        /// Always `true`.
        success: bool,
        /// Operation result.
        data: T,
    },
    /// The operation failed.
    Error {
        /// Always `false`.
        success: bool,
        /// HTTP-style status code (401, 500, ...).
        status: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl<T> Response<T> {
    /// Create a success response.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Response::Success {
            success: true,
            data,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Response::Error {
            success: false,
            status,
            message: message.into(),
        }
    }

    /// Whether this is a success response.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    /// The payload, if this is a success response.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Response::Success { data, .. } => Some(data),
            Response::Error { .. } => None,
        }
    }
}
