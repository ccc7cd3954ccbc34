//! # Manager Errors
//!
//! Every error belongs to one category that tells the caller what to do
//! next (see `ErrorCategory`).

use shared_types::Address;
use thiserror::Error;
use ur_01_crypto_protocol::SignatureError;
use ur_02_onchain_gateway::GatewayError;
use ur_03_channel_store::StoreError;

/// How a caller should react to a `ManagerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected without state change; retry with a corrected proof
    ProtocolViolation,
    /// Retry later or use a different channel
    ChannelLifecycle,
    /// Refuse to run
    Durability,
    /// Chain unreachable; retried on the poll cadence
    BlockchainLiveness,
    /// Not enough ether for gas; closes degrade to `ClosePending`
    FundsExhaustion,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid balance proof: {0}")]
    InvalidBalanceProof(String),

    #[error("invalid balance amount: {0}")]
    InvalidBalanceAmount(String),

    #[error("no open channel (sender {sender:?}, block {open_block_number})")]
    NoOpenChannel {
        sender: Address,
        open_block_number: u32,
    },

    #[error("insufficient confirmations for channel (sender {sender:?}, block {open_block_number})")]
    InsufficientConfirmations {
        sender: Address,
        open_block_number: u32,
    },

    #[error("no balance proof received (sender {sender:?}, block {open_block_number})")]
    NoBalanceProofReceived {
        sender: Address,
        open_block_number: u32,
    },

    #[error("insufficient funds for transaction: {0}")]
    InsufficientFunds(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(GatewayError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl From<GatewayError> for ManagerError {
    fn from(e: GatewayError) -> Self {
        if e.is_insufficient_funds() {
            ManagerError::InsufficientFunds(e.to_string())
        } else {
            ManagerError::Gateway(e)
        }
    }
}

impl ManagerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ManagerError::InvalidBalanceProof(_)
            | ManagerError::InvalidBalanceAmount(_)
            | ManagerError::Signature(_) => ErrorCategory::ProtocolViolation,
            ManagerError::NoOpenChannel { .. }
            | ManagerError::InsufficientConfirmations { .. }
            | ManagerError::NoBalanceProofReceived { .. } => ErrorCategory::ChannelLifecycle,
            ManagerError::Store(_) => ErrorCategory::Durability,
            ManagerError::InsufficientFunds(_) => ErrorCategory::FundsExhaustion,
            ManagerError::Gateway(e) if e.is_transient() => ErrorCategory::BlockchainLiveness,
            ManagerError::Gateway(_) => ErrorCategory::ChannelLifecycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_funds_error_is_promoted() {
        let err: ManagerError = GatewayError::InsufficientFunds("0 wei".into()).into();
        assert!(matches!(err, ManagerError::InsufficientFunds(_)));
        assert_eq!(err.category(), ErrorCategory::FundsExhaustion);

        let err: ManagerError = GatewayError::Rpc {
            code: -32000,
            message: "insufficient funds for gas * price + value".into(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::FundsExhaustion);
    }

    #[test]
    fn test_categories() {
        let transport: ManagerError = GatewayError::Transport("refused".into()).into();
        assert_eq!(transport.category(), ErrorCategory::BlockchainLiveness);

        let reverted: ManagerError = GatewayError::Reverted("nope".into()).into();
        assert_eq!(reverted.category(), ErrorCategory::ChannelLifecycle);

        assert_eq!(
            ManagerError::InvalidBalanceAmount("x".into()).category(),
            ErrorCategory::ProtocolViolation
        );
        assert_eq!(
            ManagerError::Store(StoreError::Corrupted("x".into())).category(),
            ErrorCategory::Durability
        );
    }
}
