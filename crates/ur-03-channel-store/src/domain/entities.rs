//! # Store Entities
//!
//! The channel record, the sync cursors and the identity triple the store
//! is bound to.

use serde::{Deserialize, Serialize};
use shared_types::{Address, BlockHash, BlockNumber, ChannelKey, Signature, TxHash, U256};
use std::collections::BTreeMap;
use std::fmt;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

// =============================================================================
// CHANNEL
// =============================================================================

/// Lifecycle state of a channel as seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Payments and topups accepted
    Open,
    /// A close was requested on-chain (or signed off-chain); waiting for settlement
    CloseRequested,
    /// Our close transaction could not be funded; retried by the maintenance sweep
    ClosePending,
    /// Closed locally; the record stays until `ChannelSettled` is observed
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Open => "open",
            ChannelState::CloseRequested => "close_requested",
            ChannelState::ClosePending => "close_pending",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One payment channel from `sender` to this receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub sender: Address,
    pub receiver: Address,
    pub open_block_number: u32,

    /// Confirmed on-chain deposit.
    pub deposit: U256,

    /// Highest balance proven by the sender so far.
    pub balance: U256,

    /// Sender's signature over `balance`.
    pub last_signature: Option<Signature>,

    pub state: ChannelState,

    /// Whether the opening event is past the confirmation depth.
    pub confirmed: bool,

    /// Block from which the sender may settle after an uncooperative close.
    pub settle_timeout: Option<u32>,

    /// Total already paid out through `withdraw`.
    pub withdrawn_balance: U256,

    pub ctime: Timestamp,
    pub mtime: Timestamp,

    /// Topups seen in the unconfirmed window, by transaction hash.
    ///
    /// Persisted as separate rows; see `ChannelStore`.
    #[serde(skip)]
    pub unconfirmed_topups: BTreeMap<TxHash, U256>,
}

impl Channel {
    /// A freshly opened channel with nothing paid yet.
    pub fn new(sender: Address, receiver: Address, open_block_number: u32, deposit: U256) -> Self {
        Self {
            sender,
            receiver,
            open_block_number,
            deposit,
            balance: U256::zero(),
            last_signature: None,
            state: ChannelState::Open,
            confirmed: false,
            settle_timeout: None,
            withdrawn_balance: U256::zero(),
            ctime: 0,
            mtime: 0,
            unconfirmed_topups: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.sender, self.open_block_number)
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Deposit including topups that are not confirmed yet.
    pub fn unconfirmed_deposit(&self) -> U256 {
        self.unconfirmed_topups
            .values()
            .fold(self.deposit, |acc, amount| acc.saturating_add(*amount))
    }

    /// Proven balance not yet paid out through `withdraw`.
    pub fn withdrawable(&self) -> U256 {
        self.balance.saturating_sub(self.withdrawn_balance)
    }
}

// =============================================================================
// SYNC STATE
// =============================================================================

/// Sync cursors. `None` until the first sync tick commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub confirmed_head_number: Option<BlockNumber>,
    pub confirmed_head_hash: Option<BlockHash>,
    pub unconfirmed_head_number: Option<BlockNumber>,
    pub unconfirmed_head_hash: Option<BlockHash>,
}

impl SyncState {
    /// Move the unconfirmed cursor back onto the confirmed one.
    pub fn rewind_unconfirmed(&mut self) {
        self.unconfirmed_head_number = self.confirmed_head_number;
        self.unconfirmed_head_hash = self.confirmed_head_hash;
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// The `(network, contract, receiver)` triple a state file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIdentity {
    pub network_id: u64,
    pub contract_address: Address,
    pub receiver: Address,
}


// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// On-disk format of a state path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Single append-only log file
    #[default]
    File,
    /// RocksDB directory
    #[cfg(feature = "rocksdb")]
    RocksDb,
}
