//! Domain types for the RPC layer.
//!
//! Correlation ids, the pending-call registry, errors and configuration.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pending;

// Re-exports for convenience
pub use config::{ConfigError, RetryPolicy, RpcConfig};
pub use correlation::CorrelationId;
pub use error::{panic_message, RpcError};
pub use pending::{Payload, PendingCallRegistry, PendingStats, ReplySlot};
