//! # Client Channel (ur-06)
//!
//! The paying side of a channel: open it with one token transfer, sign
//! ever-growing balance proofs off-chain, top it up, and close it either
//! cooperatively (with the receiver's closing signature) or through the
//! challenge period.
//!
//! `ClientChannel` is plain serializable data so that a wallet can keep its
//! channel list anywhere; `ChannelClient` holds the key and the contract.
//!
//! ```text
//!   open_channel ──► Open ──create_transfer──► Open
//!                     │ └──── topup ────────► Open
//!                     ├── close ──► Settling ──settle──► Closed
//!                     └── close_cooperatively ─────────► Closed
//! ```

pub mod config;
pub mod domain;
pub mod service;

pub use config::ClientConfig;
pub use domain::channel::{deserialize_channels, serialize_channels, ClientChannel, ClientChannelState};
pub use domain::errors::ClientError;
pub use service::ChannelClient;
