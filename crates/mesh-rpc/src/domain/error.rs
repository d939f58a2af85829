//! RPC error types.

use shared_bus::BusError;
use std::any::Any;
use std::time::Duration;
use thiserror::Error;

use crate::domain::correlation::CorrelationId;

/// Errors from calling or serving over the bus.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport failure (dial, declare, publish, consume).
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The id is already waiting for a reply. Never overwritten.
    #[error("correlation id {0} is already pending")]
    CorrelationCollision(CorrelationId),

    /// A reply arrived with a content type other than JSON.
    #[error("invalid content type: {0:?}")]
    InvalidContentType(String),

    /// The reply stream (or inbound stream) ended underneath the caller.
    #[error("connection lost")]
    ConnectionLost,

    /// The pending call was removed without being fulfilled.
    #[error("reply abandoned")]
    ReplyAbandoned,

    /// No reply before the caller's deadline.
    #[error("no reply within {0:?}")]
    DeadlineExceeded(Duration),

    /// Connecting kept failing until the retry ceiling was reached.
    #[error("gave up connecting after {attempts} attempts: {source}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: Box<RpcError>,
    },
}

impl RpcError {
    /// True when the transport died underneath an established session.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            RpcError::ConnectionLost => true,
            RpcError::Bus(e) => e.is_connection_lost(),
            _ => false,
        }
    }

    /// Label used for the call failure metric.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            RpcError::Bus(_) => "publish",
            RpcError::CorrelationCollision(_) => "collision",
            RpcError::InvalidContentType(_) => "content_type",
            RpcError::ConnectionLost => "connection_lost",
            RpcError::ReplyAbandoned => "abandoned",
            RpcError::DeadlineExceeded(_) => "deadline",
            RpcError::ConnectExhausted { .. } => "connect",
        }
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
