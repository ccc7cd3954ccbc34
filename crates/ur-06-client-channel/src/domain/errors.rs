//! # Client Errors

use super::channel::ClientChannelState;
use shared_types::{Address, U256};
use thiserror::Error;
use ur_01_crypto_protocol::SignatureError;
use ur_02_onchain_gateway::{EventKind, GatewayError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("insufficient tokens: need {needed}, have {available}")]
    InsufficientTokens { needed: U256, available: U256 },

    #[error("insufficient channel funds: need {needed}, {available} left")]
    InsufficientChannelFunds { needed: U256, available: U256 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("cannot {operation} a {state} channel")]
    InvalidState {
        operation: &'static str,
        state: ClientChannelState,
    },

    #[error("closing signature is not from receiver {0:?}")]
    InvalidClosingSignature(Address),

    #[error("no {0:?} event before timeout")]
    EventTimeout(EventKind),

    #[error("challenge period not over ({remaining} blocks left)")]
    ChallengePeriod { remaining: u64 },

    #[error("channel unknown to the contract")]
    UnknownChannel,

    #[error("channel list serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}
