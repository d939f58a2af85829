//! Integration flows across the bus, the RPC layer and the router.

pub mod resilience_flows;
pub mod routing_flows;
pub mod rpc_flows;
