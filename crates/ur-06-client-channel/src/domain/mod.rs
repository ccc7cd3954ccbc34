//! Domain layer: the payer's channel record and errors.

pub mod channel;
pub mod errors;
