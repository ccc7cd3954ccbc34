//! # uRaiden Receiver Runtime
//!
//! Library half of the `receiver-runtime` binary: environment configuration
//! and the startup / shutdown sequence around the channel manager and the
//! blockchain sync loop. The paywall itself is mounted by whatever HTTP
//! server embeds `ur_04_channel_manager::Paywall`.

pub mod config;
pub mod runtime;

pub use config::{ConfigError, RuntimeConfig};
pub use runtime::{ReceiverRuntime, RuntimeError};
