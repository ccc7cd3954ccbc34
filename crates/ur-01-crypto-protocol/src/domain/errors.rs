//! # Signature Errors

use shared_types::ParseError;
use thiserror::Error;

/// Errors that can occur while hashing, signing or recovering.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature is not exactly 65 bytes
    #[error("Invalid signature length: expected 65, got {0}")]
    InvalidLength(usize),

    /// The r/s components do not form a valid secp256k1 signature
    #[error("Invalid signature format")]
    InvalidFormat,

    /// Recovery ID outside the accepted encodings
    #[error("Invalid recovery ID: {0}")]
    InvalidRecoveryId(u64),

    /// Failed to recover public key from signature
    #[error("Failed to recover public key")]
    RecoveryFailed,

    /// Private key bytes are not a valid secp256k1 scalar
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// The signing primitive itself failed
    #[error("Signing failed")]
    SigningFailed,

    /// A message field does not fit its ABI width
    #[error("Value out of range for {field}")]
    ValueOutOfRange { field: &'static str },

    /// Raw transaction bytes are not a signed legacy transaction
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),
}

impl From<ParseError> for SignatureError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::InvalidLength { actual, .. } => Self::InvalidLength(actual),
            _ => Self::InvalidFormat,
        }
    }
}
