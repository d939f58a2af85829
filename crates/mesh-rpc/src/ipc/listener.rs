//! Delivery stream consumers.
//!
//! - [`ReplyListener`] drains a requester's private reply queue into the
//!   pending-call registry.
//! - [`InboundListener`] serves a module's named queue: every delivery is
//!   dispatched in its own task and answered on the delivery's reply-to
//!   address.

use async_trait::async_trait;
use futures::FutureExt;
use shared_bus::{BusChannel, Delivery, DeliveryStream, Publishing, QueueSpec, DEFAULT_EXCHANGE};
use shared_types::{ErrorEnvelope, CONTENT_TYPE_JSON};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{panic_message, RpcError};
use crate::domain::pending::{Payload, PendingCallRegistry};
use mesh_telemetry::{ORPHAN_REPLIES, REPLIES_RECEIVED};

/// Answers inbound calls.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Produce the reply for one request. Must not fail: failures are
    /// encoded in the returned payload. A panic is answered with a 500
    /// error envelope.
    async fn handle(&self, request: Payload) -> Payload;
}

/// Routes replies on a requester's private queue to waiting callers.
pub struct ReplyListener {
    registry: Arc<PendingCallRegistry>,
    closed: Arc<AtomicBool>,
}

impl ReplyListener {
    pub fn new(registry: Arc<PendingCallRegistry>, closed: Arc<AtomicBool>) -> Self {
        Self { registry, closed }
    }

    /// Run until the stream ends, then mark the requester closed and wake
    /// every pending caller with `ConnectionLost`.
    pub async fn run(self, mut stream: DeliveryStream) {
        while let Some(delivery) = stream.next().await {
            self.handle_reply(delivery);
        }

        self.closed.store(true, Ordering::SeqCst);
        let abandoned = self.registry.abandon_all();
        warn!(abandoned, "Reply stream ended, stopping listener");
    }

    fn handle_reply(&self, delivery: Delivery) {
        let id = match delivery.correlation_id.as_deref().map(CorrelationId::parse) {
            Some(Ok(id)) => id,
            Some(Err(_)) | None => {
                ORPHAN_REPLIES.inc();
                warn!(
                    correlation_id = ?delivery.correlation_id,
                    "Reply without a usable correlation id, dropped"
                );
                return;
            }
        };

        let reply = Payload {
            content_type: delivery.content_type,
            body: delivery.body,
        };
        if self.registry.fulfill(id, reply) {
            REPLIES_RECEIVED.inc();
        }
    }
}

/// A module's inbound queue, declared and consumed, ready to serve.
pub struct InboundListener {
    channel: Arc<dyn BusChannel>,
    queue: String,
    stream: DeliveryStream,
    handler: Arc<dyn RpcHandler>,
    permits: Arc<Semaphore>,
}

impl InboundListener {
    /// Declare `queue` and start consuming it with manual acknowledgement.
    pub async fn bind(
        channel: Arc<dyn BusChannel>,
        queue: &str,
        handler: Arc<dyn RpcHandler>,
        max_in_flight: usize,
    ) -> Result<Self, RpcError> {
        let queue = channel.declare_queue(QueueSpec::named(queue)).await?;
        let stream = channel.consume(&queue, false).await?;
        info!(queue = %queue, max_in_flight, "Inbound queue bound");

        Ok(Self {
            channel,
            queue,
            stream,
            handler,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Dispatch deliveries until the stream ends.
    ///
    /// Ingestion pauses while `max_in_flight` dispatches are running. The end
    /// of the stream is reported as `ConnectionLost`.
    pub async fn serve(mut self) -> Result<(), RpcError> {
        while let Some(delivery) = self.stream.next().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let channel = self.channel.clone();
            let handler = self.handler.clone();

            tokio::spawn(async move {
                let _permit = permit;
                answer(channel.as_ref(), handler.as_ref(), delivery).await;
            });
        }

        warn!(queue = %self.queue, "Inbound stream ended");
        Err(RpcError::ConnectionLost)
    }
}

/// Handle one inbound delivery: dispatch, publish the reply, then ack.
async fn answer(channel: &dyn BusChannel, handler: &dyn RpcHandler, delivery: Delivery) {
    let Some(reply_to) = delivery.reply_to.clone() else {
        warn!(
            delivery_tag = delivery.delivery_tag,
            correlation_id = ?delivery.correlation_id,
            "Inbound call without reply-to address, rejected"
        );
        if let Err(e) = delivery.reject(false).await {
            warn!(error = %e, "Failed to reject delivery");
        }
        return;
    };

    let request = Payload {
        content_type: delivery.content_type.clone(),
        body: delivery.body.clone(),
    };
    let reply = match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(reply) => reply,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                correlation_id = ?delivery.correlation_id,
                panic = %message,
                "Handler panicked"
            );
            let failure = ErrorEnvelope::internal(format!("handler panicked: {message}"));
            Payload::new(CONTENT_TYPE_JSON, failure.encode())
        }
    };

    let mut message = Publishing::new(reply.content_type, reply.body);
    if let Some(id) = &delivery.correlation_id {
        message = message.with_correlation_id(id.clone());
    }

    match channel.publish(DEFAULT_EXCHANGE, &reply_to, message).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                warn!(error = %e, delivery_tag = delivery.delivery_tag, "Ack failed");
            } else {
                debug!(
                    correlation_id = ?delivery.correlation_id,
                    reply_to = %reply_to,
                    "Replied to inbound call"
                );
            }
        }
        Err(e) => {
            // Left unacked: the broker redelivers it.
            error!(
                error = %e,
                correlation_id = ?delivery.correlation_id,
                reply_to = %reply_to,
                "Reply publish failed"
            );
        }
    }
}
