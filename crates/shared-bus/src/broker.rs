//! # Broker Boundary
//!
//! What a module needs from its message broker: dial a connection, declare
//! queues, publish to a routing key, and consume a queue with manual
//! acknowledgement.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::delivery::DeliveryStream;
use crate::error::BusError;

/// Name of the default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Message body plus the properties the RPC layer relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishing {
    pub content_type: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Bytes,
}

impl Publishing {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            correlation_id: None,
            reply_to: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Queue declaration arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// `None` asks the broker to pick a name.
    pub name: Option<String>,
    /// Usable only by the declaring connection; deleted with it.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
    pub durable: bool,
}

impl QueueSpec {
    /// Private reply queue: server-named, exclusive, auto-deleting.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: None,
            exclusive: true,
            auto_delete: true,
            durable: false,
        }
    }

    /// Shared service queue addressed by `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            exclusive: false,
            auto_delete: false,
            durable: true,
        }
    }
}

/// A logical channel on one broker connection.
///
/// Implementations must allow concurrent `publish` calls from many tasks.
#[async_trait]
pub trait BusChannel: Send + Sync {
    /// Declare a queue and return its (possibly server-assigned) name.
    /// Declaring an existing queue is a no-op.
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BusError>;

    /// Publish through `exchange`. Messages routed nowhere are dropped.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Publishing,
    ) -> Result<(), BusError>;

    /// Start consuming `queue`. With `auto_ack` deliveries are settled as
    /// soon as they are handed out.
    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, BusError>;

    /// Close the connection. Unacknowledged deliveries go back to their
    /// queues and every consumer stream on it ends.
    async fn close(&self) -> Result<(), BusError>;

    fn is_open(&self) -> bool;
}

/// Opens broker connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn BusChannel>, BusError>;
}

/// Reject URIs that name no AMQP scheme.
pub(crate) fn check_uri(uri: &str) -> Result<(), BusError> {
    if uri.starts_with("amqp://") || uri.starts_with("amqps://") {
        Ok(())
    } else {
        Err(BusError::InvalidUri(uri.to_string()))
    }
}
