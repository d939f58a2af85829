//! # Reply Payloads
//!
//! Shapes a responder publishes back to a caller's reply-to address. Both are
//! JSON and travel with [`crate::CONTENT_TYPE_JSON`].
//!
//! - [`WireResponse`]: a handler produced a response.
//! - [`ErrorEnvelope`]: dispatch failed (bad content type, malformed
//!   envelope, no route, handler error, no response produced).

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as, DefaultOnNull};

use crate::errors::WireError;

/// Status code for routing misses.
pub const STATUS_NOT_FOUND: u16 = 404;

/// Status code for protocol and handler failures.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Encoded form used if an error envelope itself cannot be serialized.
const FALLBACK_ERROR: &[u8] =
    br#"{"status_code":500,"message":"unable to serialize original error"}"#;

/// A handler's response as it travels over the bus.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub status_code: u16,
    #[serde(default)]
    pub content_type: String,
    #[serde_as(as = "DefaultOnNull<Base64>")]
    #[serde(default)]
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }
}

/// Dispatch failure reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    /// 404-class envelope for a request no route matched.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(STATUS_NOT_FOUND, message)
    }

    /// 500-class envelope for protocol and handler failures.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(STATUS_INTERNAL_ERROR, message)
    }

    /// JSON bytes of this envelope. Never fails.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| FALLBACK_ERROR.to_vec())
    }
}

/// Anything a responder may send back.
///
/// The error shape is tried first: it is the only one with a `message`
/// field, while every field of [`WireResponse`] besides the status is
/// optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Error(ErrorEnvelope),
    Response(WireResponse),
}

impl ReplyBody {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }

    /// Status code carried by either shape.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ReplyBody::Error(e) => e.status_code,
            ReplyBody::Response(r) => r.status_code,
        }
    }
}
