//! Demonstration modules.

pub mod accounts;
pub mod gateway;

pub use accounts::{Account, AccountStore};
