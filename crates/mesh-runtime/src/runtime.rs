//! # Mesh Runtime
//!
//! Picks the broker, registers every configured module, installs its routes
//! and runs its listener.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Choose the connector: in-process broker or AMQP at `rpc.broker_uri`
//! 3. Register modules in configured order (each dials the broker)
//! 4. Install routes
//! 5. Spawn one listener task per module
//!
//! ## Shutdown Sequence
//!
//! 1. Signal every module
//! 2. Wait for the listener tasks, bounded by a grace period

use anyhow::{Context, Result};
use mesh_module::{Module, ModuleError};
use shared_bus::{AmqpConnector, BusConnector, InMemoryBroker};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{DemoModule, RuntimeConfig, Transport};
use crate::demo::{accounts, gateway, AccountStore};

/// How long shutdown waits for listeners to return.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running set of modules.
pub struct MeshRuntime {
    modules: Vec<Arc<Module>>,
    listeners: JoinSet<(String, Result<(), ModuleError>)>,
    accounts: AccountStore,
}

impl MeshRuntime {
    /// Start every configured module on the configured transport.
    pub async fn start(config: RuntimeConfig) -> Result<Self> {
        let connector: Arc<dyn BusConnector> = match config.transport {
            Transport::Memory => Arc::new(InMemoryBroker::new()),
            Transport::Amqp => Arc::new(AmqpConnector::new()),
        };
        info!(transport = %config.transport, "Broker transport selected");
        Self::start_on(config, connector).await
    }

    /// Start every configured module on `connector`.
    pub async fn start_on(config: RuntimeConfig, connector: Arc<dyn BusConnector>) -> Result<Self> {
        config.validate().context("invalid runtime configuration")?;
        let store = AccountStore::new();

        let mut modules = Vec::with_capacity(config.modules.len());
        for kind in &config.modules {
            let module = Arc::new(
                Module::register(kind.name(), config.rpc.clone(), connector.clone())
                    .await
                    .with_context(|| format!("failed to register module {kind}"))?,
            );
            match kind {
                DemoModule::Accounts => accounts::install(&module, &store)?,
                DemoModule::Gateway => gateway::install(&module)?,
            }
            info!(module = %kind, routes = module.router().route_count(), "Module ready");
            modules.push(module);
        }

        let mut listeners = JoinSet::new();
        for module in &modules {
            let module = module.clone();
            listeners.spawn(async move {
                let result = module.listen().await;
                (module.name().to_string(), result)
            });
        }

        info!(modules = modules.len(), "Mesh runtime started");
        Ok(Self {
            modules,
            listeners,
            accounts: store,
        })
    }

    /// A running module by name.
    pub fn module(&self, name: &str) -> Option<&Arc<Module>> {
        self.modules.iter().find(|module| module.name() == name)
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// Wait until every module is consuming its queue. Returns false if that
    /// did not happen within `limit`.
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let all_bound = || self.modules.iter().all(|module| module.is_listening());
        tokio::time::timeout(limit, async {
            while !all_bound() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Resolves when any listener stops on its own, returning why.
    ///
    /// A listener only stops by itself when reconnecting ran out of
    /// attempts, so this is the runtime's fatal error path.
    pub async fn failed(&mut self) -> Result<()> {
        match self.listeners.join_next().await {
            Some(Ok((name, Ok(())))) => {
                warn!(module = %name, "Listener stopped");
                Ok(())
            }
            Some(Ok((name, Err(e)))) => {
                error!(module = %name, error = %e, "Listener failed");
                Err(e).with_context(|| format!("module {name} stopped listening"))
            }
            Some(Err(e)) => Err(e).context("listener task panicked"),
            None => std::future::pending().await,
        }
    }

    /// Signal every module and wait for the listeners to return.
    pub async fn shutdown(mut self) {
        info!("Initiating graceful shutdown...");
        for module in &self.modules {
            module.shutdown();
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = self.listeners.join_next().await {
                match joined {
                    Ok((name, Err(e))) => {
                        warn!(module = %name, error = %e, "Listener ended with error")
                    }
                    Ok((name, Ok(()))) => info!(module = %name, "Listener stopped"),
                    Err(e) => warn!(error = %e, "Listener task failed"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Listeners did not stop within grace period, aborting");
            self.listeners.abort_all();
        }
        info!("Shutdown complete");
    }
}
