//! # Contract Entities
//!
//! Channel info as returned by `getChannelInfo` and the five channel events.

use super::abi::{event_topic, AbiReader};
use super::errors::GatewayError;
use serde::{Deserialize, Serialize};
use shared_types::{Address, BlockNumber, ChannelKey, TxHash, H256, U256};

/// Result of `getChannelInfo(sender, receiver, open_block_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// keccak256(sender || receiver || open_block_number)
    pub key: H256,
    pub deposit: U256,
    /// Zero while no close has been requested
    pub settle_block_number: u32,
    pub closing_balance: U256,
    /// Tokens already paid out to the receiver through `withdraw`
    pub transferred_tokens: U256,
}

/// Which event a log query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ChannelCreated,
    ChannelToppedUp,
    ChannelCloseRequested,
    ChannelSettled,
    ChannelWithdraw,
}

impl EventKind {
    /// Every event kind, in the order the sync loop processes them.
    pub const ALL: [EventKind; 5] = [
        EventKind::ChannelCreated,
        EventKind::ChannelToppedUp,
        EventKind::ChannelCloseRequested,
        EventKind::ChannelSettled,
        EventKind::ChannelWithdraw,
    ];

    /// Canonical Solidity event signature.
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::ChannelCreated => "ChannelCreated(address,address,uint192)",
            EventKind::ChannelToppedUp => "ChannelToppedUp(address,address,uint32,uint192,uint192)",
            EventKind::ChannelCloseRequested => {
                "ChannelCloseRequested(address,address,uint32,uint192)"
            }
            EventKind::ChannelSettled => "ChannelSettled(address,address,uint32,uint192,uint192)",
            EventKind::ChannelWithdraw => "ChannelWithdraw(address,address,uint32,uint192)",
        }
    }

    /// topic0 of logs of this kind.
    pub fn topic(&self) -> H256 {
        event_topic(self.signature())
    }

    /// Whether the open block is an indexed topic.
    pub fn indexes_open_block(&self) -> bool {
        !matches!(self, EventKind::ChannelCreated)
    }

    fn from_topic(topic: &H256) -> Option<Self> {
        Self::ALL.into_iter().find(|k| &k.topic() == topic)
    }
}

/// Decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    Created {
        sender: Address,
        receiver: Address,
        deposit: U256,
    },
    ToppedUp {
        sender: Address,
        receiver: Address,
        open_block_number: u32,
        added_deposit: U256,
        deposit: U256,
    },
    CloseRequested {
        sender: Address,
        receiver: Address,
        open_block_number: u32,
        balance: U256,
    },
    Settled {
        sender: Address,
        receiver: Address,
        open_block_number: u32,
        balance: U256,
        receiver_tokens: U256,
    },
    Withdraw {
        sender: Address,
        receiver: Address,
        open_block_number: u32,
        withdrawn_balance: U256,
    },
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Created { .. } => EventKind::ChannelCreated,
            ChannelEvent::ToppedUp { .. } => EventKind::ChannelToppedUp,
            ChannelEvent::CloseRequested { .. } => EventKind::ChannelCloseRequested,
            ChannelEvent::Settled { .. } => EventKind::ChannelSettled,
            ChannelEvent::Withdraw { .. } => EventKind::ChannelWithdraw,
        }
    }

    pub fn sender(&self) -> Address {
        match self {
            ChannelEvent::Created { sender, .. }
            | ChannelEvent::ToppedUp { sender, .. }
            | ChannelEvent::CloseRequested { sender, .. }
            | ChannelEvent::Settled { sender, .. }
            | ChannelEvent::Withdraw { sender, .. } => *sender,
        }
    }

    pub fn receiver(&self) -> Address {
        match self {
            ChannelEvent::Created { receiver, .. }
            | ChannelEvent::ToppedUp { receiver, .. }
            | ChannelEvent::CloseRequested { receiver, .. }
            | ChannelEvent::Settled { receiver, .. }
            | ChannelEvent::Withdraw { receiver, .. } => *receiver,
        }
    }

    /// Open block carried in the topics, if this event indexes it.
    pub fn open_block_number(&self) -> Option<u32> {
        match self {
            ChannelEvent::Created { .. } => None,
            ChannelEvent::ToppedUp {
                open_block_number, ..
            }
            | ChannelEvent::CloseRequested {
                open_block_number, ..
            }
            | ChannelEvent::Settled {
                open_block_number, ..
            }
            | ChannelEvent::Withdraw {
                open_block_number, ..
            } => Some(*open_block_number),
        }
    }

    /// Encode as topics and data the way the contract emits it.
    pub fn encode(&self) -> (Vec<H256>, Vec<u8>) {
        let mut topics = vec![
            self.kind().topic(),
            address_topic(self.sender()),
            address_topic(self.receiver()),
        ];
        if let Some(block) = self.open_block_number() {
            topics.push(H256::from_low_u64_be(u64::from(block)));
        }

        let words: Vec<U256> = match self {
            ChannelEvent::Created { deposit, .. } => vec![*deposit],
            ChannelEvent::ToppedUp {
                added_deposit,
                deposit,
                ..
            } => vec![*added_deposit, *deposit],
            ChannelEvent::CloseRequested { balance, .. } => vec![*balance],
            ChannelEvent::Settled {
                balance,
                receiver_tokens,
                ..
            } => vec![*balance, *receiver_tokens],
            ChannelEvent::Withdraw {
                withdrawn_balance, ..
            } => vec![*withdrawn_balance],
        };

        let mut data = Vec::with_capacity(words.len() * 32);
        for word in words {
            let mut buf = [0u8; 32];
            word.to_big_endian(&mut buf);
            data.extend_from_slice(&buf);
        }
        (topics, data)
    }
}

/// Left-pad an address into a 32-byte topic.
pub fn address_topic(address: Address) -> H256 {
    let mut buf = [0u8; 32];
    buf[12..].copy_from_slice(address.as_bytes());
    H256(buf)
}

fn topic_address(topic: &H256) -> Result<Address, GatewayError> {
    if topic.as_bytes()[..12].iter().any(|b| *b != 0) {
        return Err(GatewayError::Abi("address topic has dirty high bytes".into()));
    }
    Ok(Address::from_slice(&topic.as_bytes()[12..]))
}

fn topic_u32(topic: &H256) -> Result<u32, GatewayError> {
    let value = U256::from_big_endian(topic.as_bytes());
    if value > U256::from(u32::MAX) {
        return Err(GatewayError::Abi("uint32 topic out of range".into()));
    }
    Ok(value.low_u32())
}

/// A log entry as the node reports it, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: BlockNumber,
    pub transaction_hash: TxHash,
    pub log_index: u64,
}

/// A decoded event together with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub block_number: BlockNumber,
    pub transaction_hash: TxHash,
    pub log_index: u64,
    pub event: ChannelEvent,
}

impl EventLog {
    /// Decode a raw log emitted by the settlement contract.
    pub fn decode(raw: &RawLog) -> Result<Self, GatewayError> {
        let topic0 = raw
            .topics
            .first()
            .ok_or_else(|| GatewayError::Abi("log has no topics".into()))?;
        let kind = EventKind::from_topic(topic0)
            .ok_or_else(|| GatewayError::Abi(format!("unknown event topic {topic0:?}")))?;

        let expected_topics = if kind.indexes_open_block() { 4 } else { 3 };
        if raw.topics.len() != expected_topics {
            return Err(GatewayError::Abi(format!(
                "expected {expected_topics} topics, got {}",
                raw.topics.len()
            )));
        }

        let sender = topic_address(&raw.topics[1])?;
        let receiver = topic_address(&raw.topics[2])?;
        let data = AbiReader::new(&raw.data);

        let event = match kind {
            EventKind::ChannelCreated => ChannelEvent::Created {
                sender,
                receiver,
                deposit: data.uint(0)?,
            },
            EventKind::ChannelToppedUp => ChannelEvent::ToppedUp {
                sender,
                receiver,
                open_block_number: topic_u32(&raw.topics[3])?,
                added_deposit: data.uint(0)?,
                deposit: data.uint(1)?,
            },
            EventKind::ChannelCloseRequested => ChannelEvent::CloseRequested {
                sender,
                receiver,
                open_block_number: topic_u32(&raw.topics[3])?,
                balance: data.uint(0)?,
            },
            EventKind::ChannelSettled => ChannelEvent::Settled {
                sender,
                receiver,
                open_block_number: topic_u32(&raw.topics[3])?,
                balance: data.uint(0)?,
                receiver_tokens: data.uint(1)?,
            },
            EventKind::ChannelWithdraw => ChannelEvent::Withdraw {
                sender,
                receiver,
                open_block_number: topic_u32(&raw.topics[3])?,
                withdrawn_balance: data.uint(0)?,
            },
        };

        Ok(Self {
            block_number: raw.block_number,
            transaction_hash: raw.transaction_hash,
            log_index: raw.log_index,
            event,
        })
    }

    /// Key of the channel this event refers to.
    ///
    /// `ChannelCreated` does not carry the open block; it is the block the
    /// log was mined in.
    pub fn channel_key(&self) -> ChannelKey {
        let open_block = self
            .event
            .open_block_number()
            .unwrap_or(self.block_number as u32);
        ChannelKey::new(self.event.sender(), open_block)
    }
}

/// Optional topic filters for a log query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub sender: Option<Address>,
    pub receiver: Option<Address>,
    pub open_block_number: Option<u32>,
}

impl LogFilter {
    /// Logs addressed to one receiver.
    pub fn receiver(receiver: Address) -> Self {
        Self {
            receiver: Some(receiver),
            ..Self::default()
        }
    }

    /// Logs of one specific channel.
    pub fn channel(sender: Address, receiver: Address, open_block_number: Option<u32>) -> Self {
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
            open_block_number,
        }
    }

    /// Topic list for `eth_getLogs`; `None` entries are wildcards.
    pub fn topics(&self, kind: EventKind) -> Vec<Option<H256>> {
        let mut topics = vec![
            Some(kind.topic()),
            self.sender.map(address_topic),
            self.receiver.map(address_topic),
        ];
        if kind.indexes_open_block() {
            topics.push(
                self.open_block_number
                    .map(|b| H256::from_low_u64_be(u64::from(b))),
            );
        }
        while matches!(topics.last(), Some(None)) {
            topics.pop();
        }
        topics
    }

    /// Whether a decoded event passes this filter.
    pub fn matches(&self, log: &EventLog) -> bool {
        self.sender.map_or(true, |s| s == log.event.sender())
            && self.receiver.map_or(true, |r| r == log.event.receiver())
            && self
                .open_block_number
                .map_or(true, |b| log.channel_key().open_block_number == b)
    }
}
