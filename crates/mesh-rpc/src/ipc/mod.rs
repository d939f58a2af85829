//! Bus-facing halves of the RPC layer.

pub mod listener;
pub mod requester;

pub use listener::{InboundListener, ReplyListener, RpcHandler};
pub use requester::RpcRequester;
