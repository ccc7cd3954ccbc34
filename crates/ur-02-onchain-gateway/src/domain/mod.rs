//! # Domain Layer
//!
//! Contract-facing value types and the ABI codec. No I/O.

pub mod abi;
pub mod entities;
pub mod errors;
