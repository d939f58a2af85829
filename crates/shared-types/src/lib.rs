//! # Shared Types Crate
//!
//! The wire model exchanged between modules over the bus.
//!
//! ## Layers
//!
//! - **Transport metadata** (owned by `shared-bus`): content type,
//!   correlation id and reply-to address of a bus message.
//! - **Envelope** (this crate): the JSON body of a request message. It carries
//!   the verb, the path, the payload's own content type, the payload bytes
//!   and an optional identity.
//! - **Reply shapes** (this crate): [`WireResponse`] for a handled request,
//!   [`ErrorEnvelope`] for a dispatch failure.
//!
//! The envelope itself always travels as [`CONTENT_TYPE_JSON`]; the
//! `content_type` field inside it describes the payload, not the envelope.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod ipc;

pub use entities::{User, Verb};
pub use envelope::Envelope;
pub use errors::WireError;
pub use ipc::{ErrorEnvelope, ReplyBody, WireResponse};

/// Content type of every envelope and reply body on the bus.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Returns true when `content_type` names JSON, ignoring parameters such as
/// `; charset=utf-8`.
#[must_use]
pub fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|media| media.eq_ignore_ascii_case(CONTENT_TYPE_JSON))
}
