//! # Request Envelope
//!
//! The JSON body of every request message published to a module's queue.
//!
//! ```json
//! {
//!   "method": "GET",
//!   "path": "/accounts/42?fields=name",
//!   "content_type": "application/json",
//!   "body": "eyJpZCI6NDJ9",
//!   "user": null
//! }
//! ```
//!
//! `body` is base64 so arbitrary payload bytes round-trip exactly.

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as, DefaultOnNull};

use crate::entities::{User, Verb};
use crate::errors::WireError;

/// A request as it travels over the bus.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Verb as sent by the caller. Kept as a string so that a verb this
    /// module does not know is routed as "not found" rather than rejected
    /// as malformed.
    #[serde(rename = "method")]
    pub verb: String,

    /// Target path, optionally with a query string.
    pub path: String,

    /// Content type of `body`.
    #[serde(default)]
    pub content_type: String,

    /// Payload bytes.
    #[serde_as(as = "DefaultOnNull<Base64>")]
    #[serde(default)]
    pub body: Vec<u8>,

    /// Caller identity, if any.
    #[serde(default)]
    pub user: Option<User>,
}

impl Envelope {
    pub fn new(
        verb: Verb,
        path: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Vec<u8>>,
        user: Option<User>,
    ) -> Self {
        Self {
            verb: verb.as_str().to_string(),
            path: path.into(),
            content_type: content_type.into(),
            body: body.into(),
            user,
        }
    }

    /// Parsed verb, or `UnknownVerb` for anything outside the fixed set.
    pub fn verb(&self) -> Result<Verb, WireError> {
        self.verb.parse()
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Parse the JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}
