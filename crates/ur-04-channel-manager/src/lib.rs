//! # Channel Manager (ur-04)
//!
//! Receiver-side view of every payment channel opened towards one receiver
//! on one settlement contract.
//!
//! ## Responsibilities
//!
//! - Apply contract events relayed by the sync loop (`ChainEventHandler`)
//! - Verify and register off-chain balance proofs
//! - Close channels cooperatively, dispute cheating close requests
//! - Withdraw proven balances without closing
//! - Gate priced resources on `RDN-*` payment headers (`Paywall`)
//!
//! ## Error handling
//!
//! Every `ManagerError` maps onto an `ErrorCategory`: protocol violations
//! and lifecycle errors are returned to the payer, durability errors stop
//! the process, liveness and funds errors degrade closes to `ClosePending`.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::paywall::{header, HeaderError, PaymentHeaders, Paywall, PaywallDecision};
pub use config::ManagerConfig;
pub use domain::errors::{ErrorCategory, ManagerError};
pub use domain::status::SyncStatus;
pub use ports::inbound::ChainEventHandler;
pub use service::ChannelManager;
