//! # Nano-Mesh Runtime
//!
//! Boots the configured demonstration modules on the configured broker
//! (in-process, or AMQP via `MESH_TRANSPORT=amqp`), then runs until Ctrl+C or until a module's listener runs out of reconnect
//! attempts.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize telemetry (logging + metrics)
//! 3. Start the modules
//! 4. Issue one call through the mesh as a readiness check
//! 5. Wait for Ctrl+C

use anyhow::{Context, Result};
use mesh_module::Verb;
use mesh_runtime::{MeshRuntime, RuntimeConfig};
use mesh_telemetry::{encode_metrics, init_telemetry};
use std::time::Duration;
use tracing::{info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Call the first started module's cheapest capability and log the answer.
async fn readiness_check(runtime: &MeshRuntime, config: &RuntimeConfig) {
    let Some(first) = config.modules.first() else {
        return;
    };
    let Some(module) = runtime.module(first.name()) else {
        return;
    };
    let path = match first {
        mesh_runtime::DemoModule::Accounts => "/accounts",
        mesh_runtime::DemoModule::Gateway => "/gateway/health",
    };

    let call = module.call_json(Verb::Get, path, &serde_json::Value::Null, None);
    match tokio::time::timeout(READY_TIMEOUT, call).await {
        Ok(Ok(response)) => info!(path, status = response.status_code, "Readiness check answered"),
        Ok(Err(e)) => warn!(path, error = %e, "Readiness check failed"),
        Err(_) => warn!(path, "Readiness check timed out"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("failed to load configuration")?;
    let _telemetry =
        init_telemetry(config.telemetry.clone()).context("failed to initialize telemetry")?;

    info!("===========================================");
    info!("  Nano-Mesh Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let mut runtime = MeshRuntime::start(config.clone()).await?;
    if runtime.wait_ready(READY_TIMEOUT).await {
        readiness_check(&runtime, &config).await;
    } else {
        warn!("Modules did not bind their queues in time");
    }

    info!("Mesh is running. Press Ctrl+C to stop.");
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")
        }
        failure = runtime.failed() => failure,
    };

    runtime.shutdown().await;

    if config.dump_metrics {
        match encode_metrics() {
            Ok(text) => info!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }
    }

    outcome
}
