//! Adapters layer.

pub mod paywall;
