//! # Shared Types Crate
//!
//! Primitive types used across the uRaiden subsystems.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: addresses, hashes and token amounts are the
//!   `primitive-types` fixed-width types everywhere; nobody passes hex strings
//!   around internally.
//! - **Composite Channel Identity**: a channel is identified by
//!   `(sender, open_block_number)` from the receiver's point of view.
//! - **Wire-Stable Signatures**: `Signature` always serializes as the 65-byte
//!   `r || s || v` form the settlement contract consumes.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
