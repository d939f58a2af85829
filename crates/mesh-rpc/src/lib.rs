//! # Mesh RPC
//!
//! Turns a fire-and-forget message bus into request/response calls.
//!
//! ## Architecture
//!
//! ```text
//! caller ──> RpcRequester ── publish(key, reply_to, correlation_id) ──> broker
//!                 │                                                     │
//!         PendingCallRegistry <── ReplyListener <── reply queue <───────┤
//!                                                                       │
//! RpcHandler <── InboundListener <── module queue <─────────────────────┘
//! ```
//!
//! - [`RpcRequester`]: allocates a correlation id, registers a reply slot,
//!   publishes, waits.
//! - [`ReplyListener`]: matches replies to slots; orphans are logged and
//!   dropped.
//! - [`InboundListener`]: serves a named queue, one bounded task per
//!   delivery, ack after the reply is published.
//! - [`Supervisor`]: bounded reconnect loop around a [`Session`].

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod ipc;
pub mod supervisor;

pub use domain::config::{ConfigError, RetryPolicy, RpcConfig};
pub use domain::correlation::CorrelationId;
pub use domain::error::{panic_message, RpcError};
pub use domain::pending::{Payload, PendingCallRegistry, PendingStats, ReplySlot};
pub use ipc::{InboundListener, ReplyListener, RpcHandler, RpcRequester};
pub use supervisor::{Session, Supervisor};
