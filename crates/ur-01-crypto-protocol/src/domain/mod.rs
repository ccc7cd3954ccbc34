//! # Domain Layer
//!
//! Pure cryptographic logic with no I/O dependencies.

pub mod ecdsa;
pub mod errors;
pub mod messages;
pub mod transaction;
