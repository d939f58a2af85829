//! Shared test fixtures.

use mesh_module::{Module, ModuleError};
use mesh_rpc::{RetryPolicy, RpcConfig};
use shared_bus::InMemoryBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// RPC config with a short retry pause.
pub fn fast_config(max_attempts: u32) -> RpcConfig {
    RpcConfig {
        retry: RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(10),
        },
        ..RpcConfig::default()
    }
}

/// Register a module named `name` on `broker`.
pub async fn module(broker: &InMemoryBroker, name: &str, config: RpcConfig) -> Arc<Module> {
    Arc::new(
        Module::register(name, config, Arc::new(broker.clone()))
            .await
            .expect("module registration"),
    )
}

/// Run `module`'s listener in the background.
pub fn listen(module: &Arc<Module>) -> JoinHandle<Result<(), ModuleError>> {
    let module = module.clone();
    tokio::spawn(async move { module.listen().await })
}

/// Wait until `queue` has a consumer.
pub async fn bound(broker: &InMemoryBroker, queue: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.consumer_count(queue) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("queue never bound");
}

/// Register a module, start its listener and wait for it to bind.
pub async fn serving(
    broker: &InMemoryBroker,
    name: &str,
    config: RpcConfig,
    install: impl FnOnce(&Module),
) -> (Arc<Module>, JoinHandle<Result<(), ModuleError>>) {
    let module = module(broker, name, config).await;
    install(&module);
    let handle = listen(&module);
    bound(broker, name).await;
    (module, handle)
}
