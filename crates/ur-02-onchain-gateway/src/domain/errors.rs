//! # Gateway Errors

use thiserror::Error;
use ur_01_crypto_protocol::SignatureError;

/// Errors returned by the settlement gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The node could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something that is not what the method returns
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Call data or return data could not be decoded
    #[error("ABI decoding failed: {0}")]
    Abi(String),

    /// The contract rejected the call
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    /// The sending account cannot pay for gas
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Signing or decoding a transaction failed
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

impl GatewayError {
    /// Liveness failures that should be retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Rpc { .. })
    }

    /// Whether the account submitting the transaction ran out of gas funds.
    pub fn is_insufficient_funds(&self) -> bool {
        match self {
            GatewayError::InsufficientFunds(_) => true,
            GatewayError::Rpc { message, .. } => message.contains("insufficient funds"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transport("refused".into()).is_transient());
        assert!(GatewayError::Rpc {
            code: -32000,
            message: "header not found".into()
        }
        .is_transient());
        assert!(!GatewayError::Reverted("settle".into()).is_transient());
        assert!(!GatewayError::Abi("short".into()).is_transient());
    }

    #[test]
    fn test_insufficient_funds_detection() {
        assert!(GatewayError::InsufficientFunds("gas".into()).is_insufficient_funds());
        assert!(GatewayError::Rpc {
            code: -32000,
            message: "insufficient funds for gas * price + value".into()
        }
        .is_insufficient_funds());
        assert!(!GatewayError::Transport("down".into()).is_insufficient_funds());
    }
}
