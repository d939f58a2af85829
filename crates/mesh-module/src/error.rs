//! Module and routing errors.

use mesh_rpc::{ConfigError, RpcError};
use shared_types::WireError;
use thiserror::Error;

/// Registration-time routing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("route {pattern:?} registered without handlers")]
    EmptyChain { pattern: String },
}

/// Errors surfaced by a [`crate::Module`].
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module name cannot be empty")]
    EmptyName,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Route(#[from] RouteError),

    /// The target path has no first segment to address a module by.
    #[error("no module name in path {0:?}")]
    NoRoutingKey(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ModuleError {
    /// True when the underlying transport went away.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ModuleError::Rpc(e) if e.is_connection_lost())
    }
}
