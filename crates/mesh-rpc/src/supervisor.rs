//! Reconnection supervisor.
//!
//! Keeps a [`Session`] running across broker outages. Connecting is retried
//! up to the policy's ceiling with a fixed pause between attempts. A session
//! that connected and later lost its connection waits one pause, then starts
//! a fresh cycle with the full budget. Running out of attempts ends the supervisor with
//! `ConnectExhausted`.

use async_trait::async_trait;
use mesh_telemetry::RECONNECT_ATTEMPTS;
use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::config::RetryPolicy;
use crate::domain::error::RpcError;

/// Something the supervisor keeps connected.
#[async_trait]
pub trait Session: Send + Sync {
    /// Whatever `connect` sets up and `serve` consumes.
    type Connection: Send;

    /// Dial and set up. Every failure here counts as one attempt.
    async fn connect(&self) -> Result<Self::Connection, RpcError>;

    /// Run on an established connection. Returning an error classified as
    /// connection loss triggers a reconnect; any other error is final.
    async fn serve(&self, connection: Self::Connection) -> Result<(), RpcError>;
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the ceiling is reached.
    ///
    /// `label` names the caller in logs and metrics.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let ceiling = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    RECONNECT_ATTEMPTS.with_label_values(&[label, "success"]).inc();
                    if attempt > 1 {
                        info!(module = label, attempt, "Connected after retrying");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    RECONNECT_ATTEMPTS.with_label_values(&[label, "failed"]).inc();
                    if attempt >= ceiling {
                        error!(
                            module = label,
                            attempts = attempt,
                            error = %e,
                            "Giving up connecting"
                        );
                        return Err(RpcError::ConnectExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    warn!(
                        module = label,
                        attempt,
                        max_attempts = ceiling,
                        delay_ms = self.delay.as_millis(),
                        error = %e,
                        "Connect failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Bounded reconnect loop around a [`Session`].
pub struct Supervisor {
    policy: RetryPolicy,
    label: String,
}

impl Supervisor {
    pub fn new(label: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            policy,
            label: label.into(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Keep `session` running until it ends cleanly, fails for a reason
    /// other than connection loss, runs out of connect attempts, or
    /// `shutdown` turns true.
    pub async fn run<S: Session>(
        &self,
        session: &S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RpcError> {
        let mut cycle = 0u64;

        loop {
            cycle += 1;
            let connection = tokio::select! {
                connected = self.policy.retry(&self.label, || session.connect()) => connected?,
                _ = shutdown_requested(&mut shutdown) => {
                    info!(module = %self.label, "Shutdown requested while connecting");
                    return Ok(());
                }
            };
            info!(module = %self.label, cycle, "Session established");

            let outcome = tokio::select! {
                served = session.serve(connection) => served,
                _ = shutdown_requested(&mut shutdown) => {
                    info!(module = %self.label, "Shutdown requested");
                    return Ok(());
                }
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connection_lost() => {
                    warn!(
                        module = %self.label,
                        error = %e,
                        delay_ms = self.policy.delay.as_millis(),
                        "Connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.delay) => {}
                        _ = shutdown_requested(&mut shutdown) => {
                            info!(module = %self.label, "Shutdown requested while reconnecting");
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    error!(module = %self.label, error = %e, "Session failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Resolves once the flag is true. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
