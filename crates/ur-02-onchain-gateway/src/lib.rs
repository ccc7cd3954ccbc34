//! # On-Chain Gateway (UR-02)
//!
//! Typed access to the settlement contract and its ERC223 token.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): channel info, contract events, ABI codec
//! - **Ports Layer** (`ports/`): the `SettlementGateway` outbound port
//! - **Adapters** (`adapters/`): `JsonRpcGateway` over HTTP, `SimulatedChain`
//!   in-process ledger used by the test suites
//! - **Service Layer** (`service.rs`): `ChannelContract`, which builds, signs
//!   and submits contract transactions and waits for their events
//!
//! ## Error Semantics
//!
//! Every call may fail with a transport or RPC error. Callers treat those as
//! transient (`GatewayError::is_transient`) and retry on their own cadence.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::json_rpc::JsonRpcGateway;
pub use adapters::simulated::SimulatedChain;
pub use config::NetworkConfig;
pub use domain::abi::{ContractCall, TokenCall};
pub use domain::entities::{ChannelEvent, ChannelInfo, EventKind, EventLog, LogFilter, RawLog};
pub use domain::errors::GatewayError;
pub use ports::outbound::SettlementGateway;
pub use service::ChannelContract;
