//! # Error Types
//!
//! Failures of encoding or interpreting wire values.

use thiserror::Error;

/// Errors from the wire model.
#[derive(Debug, Error)]
pub enum WireError {
    /// A value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Bytes were not a valid wire value.
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    /// The verb is outside the supported set.
    #[error("unknown verb: {0}")]
    UnknownVerb(String),
}
