//! # Mesh Telemetry
//!
//! Logging and metrics for Nano-Mesh modules.
//!
//! ## Components
//!
//! - **Logs**: `tracing` events through a `tracing-subscriber` registry, pretty
//!   or JSON, on stderr
//! - **Metrics**: Prometheus collectors for calls, replies and dispatches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())?;
//!     // Module code here
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MESH_SERVICE_NAME` | `nano-mesh` | Service name in the startup log |
//! | `MESH_LOG_LEVEL` / `RUST_LOG` | see below | Log filter |
//! | `ENV` | unset | `production` lowers the default level to `warn` |
//! | `MESH_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{default_level, TelemetryConfig};
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, CALLS_SENT, CALL_DURATION,
    CALL_FAILURES, DISPATCHES, ORPHAN_REPLIES, PENDING_CALLS, RECONNECT_ATTEMPTS,
    REPLIES_RECEIVED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics_handle = register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard {
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry");
    }
}
