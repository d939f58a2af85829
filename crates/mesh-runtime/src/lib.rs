//! # Mesh Runtime Library
//!
//! The pieces of the `mesh-runtime` binary, exposed for tests.
//!
//! - `config`: which modules to start, the broker they dial and the settings
//!   they share
//! - `demo`: the demonstration modules (`accounts`, `gateway`)
//! - `runtime`: startup, failure detection and graceful shutdown

pub mod config;
pub mod demo;
pub mod runtime;

pub use config::{ConfigError, DemoModule, RuntimeConfig, Transport};
pub use runtime::MeshRuntime;
