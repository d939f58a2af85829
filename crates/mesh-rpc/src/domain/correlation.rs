//! Correlation ID for matching replies to calls.
//!
//! Ids come from a per-requester counter and travel as decimal strings in the
//! bus message's `correlation_id` property.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;

/// Token linking an outbound call to its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parse the wire form.
    pub fn parse(s: &str) -> Result<Self, ParseIntError> {
        s.trim().parse::<u64>().map(Self)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
