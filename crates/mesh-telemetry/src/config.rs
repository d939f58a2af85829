//! Telemetry configuration from environment variables.

use serde::{Deserialize, Serialize};
use std::env;

/// Level used outside production when nothing is configured.
pub const DEVELOPMENT_LEVEL: &str = "debug";

/// Level used when `ENV=production` and nothing is configured.
pub const PRODUCTION_LEVEL: &str = "warn";

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,

    /// `EnvFilter` directive (trace, debug, info, warn, error, or per-target)
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether to colour pretty output
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "nano-mesh".to_string(),
            log_level: DEVELOPMENT_LEVEL.to_string(),
            json_logs: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MESH_SERVICE_NAME`: Service name (default: nano-mesh)
    /// - `MESH_LOG_LEVEL` or `RUST_LOG`: Log filter. When neither is set the
    ///   level is `warn` if `ENV=production`, `debug` otherwise.
    /// - `MESH_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `NO_COLOR`: Disable ANSI colours
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();

        Self {
            service_name: lookup("MESH_SERVICE_NAME").unwrap_or_else(|| "nano-mesh".to_string()),

            log_level: lookup("MESH_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| default_level(lookup("ENV").as_deref()).to_string()),

            json_logs: lookup("MESH_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            ansi: lookup("NO_COLOR").is_none(),
        }
    }

    /// Configuration for one named module.
    pub fn for_module(module: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("mesh-{module}");
        config
    }
}

/// Level implied by the deployment environment name.
#[must_use]
pub fn default_level(environment: Option<&str>) -> &'static str {
    match environment {
        Some("production") => PRODUCTION_LEVEL,
        _ => DEVELOPMENT_LEVEL,
    }
}
