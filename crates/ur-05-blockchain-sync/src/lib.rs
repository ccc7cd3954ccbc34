//! # Blockchain Sync (ur-05)
//!
//! Poll loop that keeps the channel manager in step with the settlement
//! contract.
//!
//! ## Confirmation model
//!
//! Two cursors: the unconfirmed head follows the chain tip and feeds the
//! manager's tentative handlers (channel opened, topup); the confirmed
//! head trails it by `n_confirmations` and feeds every handler in chain
//! order. A reorg above the confirmed head only discards tentative state.
//! A reorg below it is fatal (`SyncError::ConfirmedReorg`).

pub mod config;
pub mod domain;
pub mod service;

pub use config::SyncConfig;
pub use domain::errors::SyncError;
pub use domain::plan::{plan_tick, BlockRange, TickPlan};
pub use service::BlockchainSync;
