//! # Nano-Mesh Test Suite
//!
//! Cross-crate flows that need several modules on one broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Broker, module and listener helpers
//! └── integration/
//!     ├── rpc_flows.rs        # Correlation, concurrency, byte fidelity
//!     ├── routing_flows.rs    # 404/500 envelopes, handler chains
//!     └── resilience_flows.rs # Redelivery, supervisor, deadlines
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mesh-tests
//! cargo test -p mesh-tests integration::resilience_flows
//! cargo bench -p mesh-tests
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
