//! # Client Channel
//!
//! The payer's record of one channel. Plain data: everything that needs the
//! key or the chain lives on `ChannelClient`.

use super::errors::ClientError;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use shared_types::{Address, ChannelKey, Signature, U256};
use std::fmt;
use ur_04_channel_manager::PaymentHeaders;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientChannelState {
    Open,
    /// Uncooperative close requested; waiting out the challenge period.
    Settling,
    Closed,
}

impl fmt::Display for ClientChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientChannelState::Open => "open",
            ClientChannelState::Settling => "settling",
            ClientChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientChannel {
    pub sender: Address,
    pub receiver: Address,
    pub open_block_number: u32,
    pub deposit: U256,
    /// Total transferred so far.
    pub balance: U256,
    pub state: ClientChannelState,
    /// Proof for `balance`.
    pub balance_signature: Option<Signature>,
}

impl ClientChannel {
    pub fn new(sender: Address, receiver: Address, open_block_number: u32, deposit: U256) -> Self {
        Self {
            sender,
            receiver,
            open_block_number,
            deposit,
            balance: U256::zero(),
            state: ClientChannelState::Open,
            balance_signature: None,
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.sender, self.open_block_number)
    }

    /// Deposit not yet transferred.
    pub fn remaining(&self) -> U256 {
        self.deposit.saturating_sub(self.balance)
    }

    /// Whether the channel can pay `value` more.
    pub fn is_suitable(&self, value: U256) -> bool {
        self.state == ClientChannelState::Open && self.remaining() >= value
    }

    pub fn payment_headers(&self) -> Option<PaymentHeaders> {
        self.balance_signature.map(|signature| PaymentHeaders {
            sender: self.sender,
            open_block_number: self.open_block_number,
            balance: self.balance,
            signature,
        })
    }

    /// Request headers carrying the current balance proof.
    pub fn to_headers(&self) -> Option<HeaderMap> {
        self.payment_headers().map(|p| p.to_headers())
    }
}

pub fn serialize_channels(channels: &[ClientChannel]) -> Result<String, ClientError> {
    Ok(serde_json::to_string_pretty(channels)?)
}

pub fn deserialize_channels(raw: &str) -> Result<Vec<ClientChannel>, ClientError> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ur_04_channel_manager::header;

    fn channel() -> ClientChannel {
        ClientChannel::new(Address::repeat_byte(1), Address::repeat_byte(2), 7, U256::from(10u64))
    }

    #[test]
    fn test_suitability() {
        let mut c = channel();
        c.balance = U256::from(4u64);
        assert!(c.is_suitable(U256::from(6u64)));
        assert!(!c.is_suitable(U256::from(7u64)));

        c.state = ClientChannelState::Settling;
        assert!(!c.is_suitable(U256::one()));
    }

    #[test]
    fn test_headers_need_a_signature() {
        let mut c = channel();
        assert!(c.to_headers().is_none());

        c.balance_signature = Some(Signature::from_slice(&[9u8; 65]).unwrap());
        let headers = c.to_headers().unwrap();
        assert_eq!(headers[header::OPEN_BLOCK], "7");
        assert_eq!(headers[header::BALANCE], "0");
    }

    #[test]
    fn test_channel_list_survives_serialization() {
        let mut settling = channel();
        settling.state = ClientChannelState::Settling;
        settling.balance = U256::from(3u64);
        settling.balance_signature = Some(Signature::from_slice(&[5u8; 65]).unwrap());
        let list = vec![channel(), settling];

        let raw = serialize_channels(&list).unwrap();
        assert!(raw.contains("\"settling\""));
        assert_eq!(deserialize_channels(&raw).unwrap(), list);
    }

    #[test]
    fn test_garbage_channel_list() {
        assert!(matches!(
            deserialize_channels("{not json"),
            Err(ClientError::Serialization(_))
        ));
    }
}
