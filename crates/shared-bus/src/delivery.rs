//! # Deliveries
//!
//! The consuming side of the bus: messages handed to a consumer and the
//! stream they arrive on.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::broker::Publishing;
use crate::error::BusError;

/// Settles deliveries on behalf of the connection that received them.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BusError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BusError>;
}

/// One message handed to a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    /// Set when the broker handed this message out before and it was never
    /// acknowledged.
    pub redelivered: bool,
    pub content_type: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Bytes,
    /// `None` for auto-ack consumers.
    acker: Option<Arc<dyn Acker>>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        message: Publishing,
        acker: Option<Arc<dyn Acker>>,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            content_type: message.content_type,
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            body: message.body,
            acker,
        }
    }

    /// Acknowledge the delivery. No-op for auto-ack consumers.
    pub async fn ack(&self) -> Result<(), BusError> {
        match &self.acker {
            Some(acker) => acker.ack(self.delivery_tag).await,
            None => Ok(()),
        }
    }

    /// Reject the delivery, optionally returning it to its queue.
    pub async fn reject(&self, requeue: bool) -> Result<(), BusError> {
        match &self.acker {
            Some(acker) => acker.reject(self.delivery_tag, requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("content_type", &self.content_type)
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("body_len", &self.body.len())
            .field("auto_ack", &self.acker.is_none())
            .finish()
    }
}

/// Deliveries for one consumer.
///
/// Ends when the consumer is cancelled, which happens when its connection
/// closes.
pub struct DeliveryStream {
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl DeliveryStream {
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { receiver }
    }

    /// Receive the next delivery, or `None` once the consumer is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

impl Stream for DeliveryStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
