//! # Error Types
//!
//! Parsing errors for the shared primitives.

use thiserror::Error;

/// Errors raised while decoding shared primitives from text or bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Input was not valid hexadecimal.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded byte length does not match the expected width.
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Decimal or hex quantity could not be parsed.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}
