//! Pending Call Registry - the rendezvous between a caller and its reply.
//!
//! Flow:
//! 1. Requester allocates a CorrelationId
//! 2. Requester calls `register()` and gets a [`ReplySlot`]
//! 3. Requester publishes the call with that id
//! 4. The reply stream task receives the reply and calls `fulfill()`
//! 5. Requester awaits the slot
//!
//! An entry leaves the map the moment it is fulfilled, cancelled or
//! abandoned. Dropping a slot cancels its entry, so a caller that stops
//! waiting never leaks one.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mesh_telemetry::{ORPHAN_REPLIES, PENDING_CALLS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RpcError;

/// Content-typed bytes, as carried by one bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub content_type: String,
    pub body: Bytes,
}

impl Payload {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

type ReplyResult = Result<Payload, RpcError>;

/// A call waiting for its reply
struct PendingCall {
    sender: oneshot::Sender<ReplyResult>,
    created_at: Instant,
    routing_key: String,
}

/// Statistics for the registry
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls fulfilled with a reply
    pub total_completed: AtomicU64,
    /// Total replies that matched no pending call
    pub total_orphaned: AtomicU64,
    /// Total calls withdrawn by their caller
    pub total_cancelled: AtomicU64,
    /// Total calls woken because the connection died
    pub total_abandoned: AtomicU64,
}

/// Thread-safe map from correlation id to a single-use reply slot.
#[derive(Default)]
pub struct PendingCallRegistry {
    pending: DashMap<CorrelationId, PendingCall>,
    stats: PendingStats,
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and get the slot its reply will arrive in.
    ///
    /// Fails with `CorrelationCollision` if `id` is already pending; the
    /// existing entry is left untouched.
    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
        routing_key: &str,
    ) -> Result<ReplySlot, RpcError> {
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(id) {
            Entry::Occupied(_) => {
                warn!(correlation_id = %id, routing_key, "Correlation id collision");
                return Err(RpcError::CorrelationCollision(id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    sender: tx,
                    created_at: Instant::now(),
                    routing_key: routing_key.to_string(),
                });
            }
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        PENDING_CALLS.inc();
        debug!(correlation_id = %id, routing_key, "Registered pending call");

        Ok(ReplySlot {
            id,
            receiver: rx,
            registry: Arc::downgrade(self),
        })
    }

    /// Hand `reply` to the call waiting on `id`.
    ///
    /// Returns false, and drops the reply, when nobody is waiting.
    pub fn fulfill(&self, id: CorrelationId, reply: Payload) -> bool {
        let Some((_, pending)) = self.pending.remove(&id) else {
            self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
            ORPHAN_REPLIES.inc();
            warn!(correlation_id = %id, "Reply for unknown or withdrawn correlation id, dropped");
            return false;
        };
        PENDING_CALLS.dec();

        let elapsed = pending.created_at.elapsed();
        match pending.sender.send(Ok(reply)) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %id,
                    routing_key = %pending.routing_key,
                    response_time_ms = elapsed.as_millis(),
                    "Completed pending call"
                );
                true
            }
            Err(_) => {
                // Caller stopped waiting between removal and send.
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %id, "Pending call receiver dropped");
                false
            }
        }
    }

    /// Withdraw a pending call. Returns false if it was not pending.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        if self.pending.remove(id).is_some() {
            PENDING_CALLS.dec();
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %id, "Cancelled pending call");
            true
        } else {
            false
        }
    }

    /// Wake every waiter with `ConnectionLost` and empty the registry.
    ///
    /// Returns the number of calls abandoned.
    pub fn abandon_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut abandoned = 0;

        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                PENDING_CALLS.dec();
                let _ = pending.sender.send(Err(RpcError::ConnectionLost));
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            self.stats
                .total_abandoned
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            warn!(abandoned, "Abandoned pending calls");
        }
        abandoned
    }

    /// Get number of currently pending calls
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation id is pending
    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// The caller's end of a pending call.
///
/// Dropping the slot before the reply arrives withdraws the call.
pub struct ReplySlot {
    id: CorrelationId,
    receiver: oneshot::Receiver<ReplyResult>,
    registry: Weak<PendingCallRegistry>,
}

impl ReplySlot {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait for the reply. No built-in timeout.
    pub async fn wait(mut self) -> Result<Payload, RpcError> {
        match (&mut self.receiver).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ReplyAbandoned),
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel(&self.id);
        }
    }
}
