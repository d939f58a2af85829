//! Outbound calls.
//!
//! One requester owns one broker channel and one private reply queue. Any
//! number of calls may be in flight at once; each gets a fresh correlation
//! id and its own slot in the pending-call registry.

use bytes::Bytes;
use mesh_telemetry::{time_histogram, CALLS_SENT, CALL_DURATION, CALL_FAILURES};
use shared_bus::{BusChannel, Publishing, QueueSpec, DEFAULT_EXCHANGE};
use shared_types::is_json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RpcError;
use crate::domain::pending::{Payload, PendingCallRegistry};
use crate::ipc::listener::ReplyListener;

/// Issues calls and waits for their replies.
pub struct RpcRequester {
    channel: Arc<dyn BusChannel>,
    reply_queue: String,
    registry: Arc<PendingCallRegistry>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reply_task: JoinHandle<()>,
}

impl RpcRequester {
    /// Declare a private reply queue on `channel` and start draining it.
    pub async fn connect(channel: Arc<dyn BusChannel>) -> Result<Self, RpcError> {
        let reply_queue = channel.declare_queue(QueueSpec::anonymous()).await?;
        let stream = channel.consume(&reply_queue, true).await?;

        let registry = Arc::new(PendingCallRegistry::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reply_task =
            tokio::spawn(ReplyListener::new(registry.clone(), closed.clone()).run(stream));

        debug!(reply_queue = %reply_queue, "Requester connected");

        Ok(Self {
            channel,
            reply_queue,
            registry,
            next_id: AtomicU64::new(1),
            closed,
            reply_task,
        })
    }

    /// Name of the private queue replies arrive on.
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// True once the reply stream has ended or the channel has closed.
    /// A closed requester fails every call with `ConnectionLost`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.channel.is_open()
    }

    pub fn registry(&self) -> &Arc<PendingCallRegistry> {
        &self.registry
    }

    /// Publish `body` to `routing_key` and wait for the reply.
    ///
    /// There is no built-in deadline; see [`Self::call_with_deadline`].
    /// Dropping the returned future withdraws the call.
    pub async fn call(
        &self,
        routing_key: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<Payload, RpcError> {
        let result = self.exchange(routing_key, content_type, body).await;
        if let Err(e) = &result {
            CALL_FAILURES.with_label_values(&[e.reason()]).inc();
        }
        result
    }

    /// [`Self::call`] bounded by `deadline`. On expiry the call is withdrawn
    /// and a late reply is dropped.
    pub async fn call_with_deadline(
        &self,
        routing_key: &str,
        content_type: &str,
        body: Bytes,
        deadline: Duration,
    ) -> Result<Payload, RpcError> {
        match tokio::time::timeout(deadline, self.exchange(routing_key, content_type, body)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                CALL_FAILURES.with_label_values(&[e.reason()]).inc();
                Err(e)
            }
            Err(_) => {
                let e = RpcError::DeadlineExceeded(deadline);
                CALL_FAILURES.with_label_values(&[e.reason()]).inc();
                debug!(routing_key, deadline_ms = deadline.as_millis(), "Call deadline exceeded");
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        routing_key: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<Payload, RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionLost);
        }

        let id = CorrelationId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let slot = self.registry.register(id, routing_key)?;

        // The reply task marks the requester closed before abandoning calls,
        // so a call registered after that point is caught here.
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionLost);
        }

        let message = Publishing::new(content_type, body)
            .with_correlation_id(id.to_string())
            .with_reply_to(self.reply_queue.clone());

        let _timer = time_histogram!(CALL_DURATION);
        if let Err(e) = self
            .channel
            .publish(DEFAULT_EXCHANGE, routing_key, message)
            .await
        {
            self.registry.cancel(&id);
            return Err(e.into());
        }
        CALLS_SENT.with_label_values(&[routing_key]).inc();
        debug!(correlation_id = %id, routing_key, "Sent call");

        let reply = slot.wait().await?;
        if !is_json(&reply.content_type) {
            return Err(RpcError::InvalidContentType(reply.content_type));
        }
        Ok(reply)
    }
}

impl Drop for RpcRequester {
    fn drop(&mut self) {
        self.reply_task.abort();
    }
}
