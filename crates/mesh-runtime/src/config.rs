//! # Runtime Configuration
//!
//! Which demonstration modules to start, which broker they meet on, plus the
//! RPC and telemetry settings they share.

use mesh_rpc::{ConfigError as RpcConfigError, RpcConfig};
use mesh_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Demonstration modules the runtime knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoModule {
    /// Account store with CRUD capabilities.
    Accounts,
    /// Front door that calls `accounts` on the caller's behalf.
    Gateway,
}

impl DemoModule {
    pub const ALL: [DemoModule; 2] = [DemoModule::Accounts, DemoModule::Gateway];

    /// Module name, which is also its queue and routing key.
    pub fn name(&self) -> &'static str {
        match self {
            DemoModule::Accounts => "accounts",
            DemoModule::Gateway => "gateway",
        }
    }
}

impl fmt::Display for DemoModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DemoModule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DemoModule::ALL
            .into_iter()
            .find(|module| module.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownModule(s.trim().to_string()))
    }
}

/// Broker the modules meet on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// In-process broker; every module must live in this runtime.
    #[default]
    Memory,
    /// AMQP broker at `rpc.broker_uri`, shared with other processes.
    Amqp,
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Memory => "memory",
            Transport::Amqp => "amqp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Transport::Memory, Transport::Amqp]
            .into_iter()
            .find(|transport| transport.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownTransport(s.trim().to_string()))
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown module {0:?} (known: accounts, gateway)")]
    UnknownModule(String),

    #[error("unknown transport {0:?} (known: memory, amqp)")]
    UnknownTransport(String),

    #[error("no modules configured")]
    NoModules,

    #[error("module {0} listed twice")]
    DuplicateModule(DemoModule),

    #[error(transparent)]
    Rpc(#[from] RpcConfigError),
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Modules to start, in start order.
    pub modules: Vec<DemoModule>,
    /// Broker the modules dial.
    pub transport: Transport,
    /// Shared RPC settings.
    pub rpc: RpcConfig,
    /// Logging settings.
    pub telemetry: TelemetryConfig,
    /// Log the Prometheus exposition at shutdown.
    pub dump_metrics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            modules: DemoModule::ALL.to_vec(),
            transport: Transport::default(),
            rpc: RpcConfig::default(),
            telemetry: TelemetryConfig {
                service_name: "mesh-runtime".to_string(),
                ..TelemetryConfig::default()
            },
            dump_metrics: false,
        }
    }
}

impl RuntimeConfig {
    /// Load from the environment.
    ///
    /// - `MESH_MODULES`: comma-separated module names (default: `accounts,gateway`)
    /// - `MESH_TRANSPORT`: `memory` (default) or `amqp`
    /// - `MESH_DUMP_METRICS`: `true` or `1` to log metrics at shutdown
    ///
    /// plus everything [`RpcConfig::from_env`] and
    /// [`TelemetryConfig::from_env`] read.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut telemetry = TelemetryConfig::from_env();
        if env::var("MESH_SERVICE_NAME").is_err() {
            telemetry.service_name = "mesh-runtime".to_string();
        }

        let modules = match env::var("MESH_MODULES") {
            Ok(list) => parse_modules(&list)?,
            Err(_) => DemoModule::ALL.to_vec(),
        };

        let transport = match env::var("MESH_TRANSPORT") {
            Ok(name) => name.parse()?,
            Err(_) => Transport::default(),
        };

        Ok(Self {
            modules,
            transport,
            rpc: RpcConfig::from_env(),
            telemetry,
            dump_metrics: env::var("MESH_DUMP_METRICS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::NoModules);
        }
        for (i, module) in self.modules.iter().enumerate() {
            if self.modules[..i].contains(module) {
                return Err(ConfigError::DuplicateModule(*module));
            }
        }
        self.rpc.validate()?;
        Ok(())
    }
}

/// Parse a comma-separated module list. Blank entries are skipped.
pub fn parse_modules(list: &str) -> Result<Vec<DemoModule>, ConfigError> {
    list.split(',')
        .filter(|name| !name.trim().is_empty())
        .map(str::parse)
        .collect()
}
