//! # Bus Errors

use thiserror::Error;

/// Errors raised by a broker connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The broker URI could not be understood.
    #[error("invalid broker uri: {0}")]
    InvalidUri(String),

    /// The broker could not be reached.
    #[error("dial {uri} failed: {reason}")]
    Dial { uri: String, reason: String },

    /// The connection (and its channel) is gone.
    #[error("connection lost")]
    ConnectionClosed,

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// An exclusive queue was used from a connection that does not own it.
    #[error("queue {0} is locked by another connection")]
    ResourceLocked(String),

    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    /// Ack or reject for a delivery that is not outstanding.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    /// A broker refused an operation on a connection that is still open.
    #[error("broker error: {0}")]
    Broker(String),
}

impl BusError {
    /// True when the error means the connection died underneath the caller.
    ///
    /// Supervisors use this to tell a lost session from a failed attempt.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, BusError::ConnectionClosed)
    }
}
