//! # Adapters
//!
//! - `json_rpc`: Ethereum JSON-RPC over HTTP
//! - `simulated`: in-process chain with the settlement contract's rules

pub mod json_rpc;
pub mod simulated;
