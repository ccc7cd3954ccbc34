//! # Channel Store Service
//!
//! Typed access to channel rows, their unconfirmed topups and the sync
//! cursors on top of any `KeyValueStore`.
//!
//! ## Key Layout
//!
//! | Section | Key |
//! |---------|-----|
//! | metadata | `metadata` |
//! | syncstate | `syncstate` |
//! | channels | `channel/` + sender (20) + open block (4, BE) |
//! | topups | `topup/` + sender (20) + open block (4, BE) + tx hash (32) |
//!
//! Values are JSON. Every mutating call is a single atomic batch, so a
//! channel row and its topup rows never disagree on disk.

use crate::adapters::file::FileBackedKVStore;
use crate::adapters::lock::StateLock;
#[cfg(feature = "rocksdb")]
use crate::adapters::rocksdb_adapter::{RocksDbConfig, RocksDbStore};
use crate::domain::entities::{Channel, ChannelState, StorageBackend, SyncState, StoreIdentity, Timestamp};
use crate::domain::errors::StoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, SystemTimeSource, TimeSource};
use shared_types::{encode_hex, Address, ChannelKey, TxHash, U256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const METADATA_KEY: &[u8] = b"metadata";
const SYNCSTATE_KEY: &[u8] = b"syncstate";
const CHANNEL_PREFIX: &[u8] = b"channel/";
const TOPUP_PREFIX: &[u8] = b"topup/";

fn channel_key(key: &ChannelKey) -> Vec<u8> {
    let mut out = CHANNEL_PREFIX.to_vec();
    out.extend_from_slice(&key.to_bytes());
    out
}

fn topup_prefix(key: &ChannelKey) -> Vec<u8> {
    let mut out = TOPUP_PREFIX.to_vec();
    out.extend_from_slice(&key.to_bytes());
    out
}

fn topup_key(key: &ChannelKey, tx_hash: &TxHash) -> Vec<u8> {
    let mut out = topup_prefix(key);
    out.extend_from_slice(tx_hash.as_bytes());
    out
}

/// Split a topup row key into its channel and transaction.
fn parse_topup_key(raw: &[u8]) -> Result<(ChannelKey, TxHash), StoreError> {
    let body = raw
        .strip_prefix(TOPUP_PREFIX)
        .filter(|b| b.len() == 24 + 32)
        .ok_or_else(|| StoreError::Corrupted(format!("bad topup key {}", encode_hex(raw))))?;
    let sender = Address::from_slice(&body[..20]);
    let block = u32::from_be_bytes([body[20], body[21], body[22], body[23]]);
    Ok((ChannelKey::new(sender, block), TxHash::from_slice(&body[24..])))
}

/// Durable store of one receiver's channels and sync cursors.
pub struct ChannelStore {
    kv: Box<dyn KeyValueStore>,
    clock: Arc<dyn TimeSource>,
    identity: StoreIdentity,
    /// Held for the lifetime of a file-backed store
    _lock: Option<StateLock>,
}

impl ChannelStore {
    /// Bind `kv` to `identity`.
    ///
    /// A fresh store records the identity; an existing one must match it
    /// field by field.
    pub fn open(kv: Box<dyn KeyValueStore>, identity: StoreIdentity) -> Result<Self, StoreError> {
        let mut store = Self {
            kv,
            clock: Arc::new(SystemTimeSource),
            identity,
            _lock: None,
        };
        store.check_identity()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory(identity: StoreIdentity) -> Result<Self, StoreError> {
        Self::open(Box::new(crate::adapters::memory::InMemoryKVStore::new()), identity)
    }

    /// Lock and open the state file at `path`.
    ///
    /// Fails fast if another process holds the lock, if the file has
    /// insecure permissions, or if it belongs to a different identity.
    pub fn open_file(path: &Path, identity: StoreIdentity) -> Result<Self, StoreError> {
        Self::open_path(path, StorageBackend::File, identity)
    }

    /// Lock and open the state at `path` in the given format.
    pub fn open_path(path: &Path, backend: StorageBackend, identity: StoreIdentity) -> Result<Self, StoreError> {
        let lock = StateLock::acquire(path)?;
        let kv: Box<dyn KeyValueStore> = match backend {
            StorageBackend::File => Box::new(FileBackedKVStore::open(path)?),
            #[cfg(feature = "rocksdb")]
            StorageBackend::RocksDb => Box::new(RocksDbStore::open(RocksDbConfig::new(path))?),
        };
        let mut store = Self::open(kv, identity)?;
        store._lock = Some(lock);
        info!(
            "[ur-03] Opened {:?} state {} ({} channels)",
            backend,
            path.display(),
            store.n_channels()?
        );
        Ok(store)
    }

    /// Replace the wall clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn check_identity(&mut self) -> Result<(), StoreError> {
        let Some(raw) = self.kv.get(METADATA_KEY)? else {
            let value = serde_json::to_vec(&self.identity)?;
            self.kv.put(METADATA_KEY, &value)?;
            debug!("[ur-03] Initialized state for receiver {:?}", self.identity.receiver);
            return Ok(());
        };

        let stored: StoreIdentity = serde_json::from_slice(&raw)?;
        let configured = self.identity;
        if stored.network_id != configured.network_id {
            return Err(StoreError::IdentityMismatch {
                field: "network_id",
                stored: stored.network_id.to_string(),
                configured: configured.network_id.to_string(),
            });
        }
        if stored.contract_address != configured.contract_address {
            return Err(StoreError::IdentityMismatch {
                field: "contract_address",
                stored: format!("{:?}", stored.contract_address),
                configured: format!("{:?}", configured.contract_address),
            });
        }
        if stored.receiver != configured.receiver {
            return Err(StoreError::IdentityMismatch {
                field: "receiver",
                stored: format!("{:?}", stored.receiver),
                configured: format!("{:?}", configured.receiver),
            });
        }
        Ok(())
    }

    // =========================================================================
    // SYNC STATE
    // =========================================================================

    pub fn sync_state(&self) -> Result<SyncState, StoreError> {
        match self.kv.get(SYNCSTATE_KEY)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(SyncState::default()),
        }
    }

    /// Read-modify-write the sync cursors in one commit.
    pub fn update_sync_state(&mut self, update: impl FnOnce(&mut SyncState)) -> Result<SyncState, StoreError> {
        let mut state = self.sync_state()?;
        update(&mut state);
        self.kv.put(SYNCSTATE_KEY, &serde_json::to_vec(&state)?)?;
        Ok(state)
    }

    // =========================================================================
    // CHANNELS
    // =========================================================================

    fn load_topups(&self, key: &ChannelKey) -> Result<BTreeMap<TxHash, U256>, StoreError> {
        let mut topups = BTreeMap::new();
        for (raw_key, value) in self.kv.prefix_scan(&topup_prefix(key))? {
            let (_, tx_hash) = parse_topup_key(&raw_key)?;
            topups.insert(tx_hash, serde_json::from_slice(&value)?);
        }
        Ok(topups)
    }

    pub fn get_channel(&self, sender: Address, open_block_number: u32) -> Result<Option<Channel>, StoreError> {
        let key = ChannelKey::new(sender, open_block_number);
        let Some(raw) = self.kv.get(&channel_key(&key))? else {
            return Ok(None);
        };
        let mut channel: Channel = serde_json::from_slice(&raw)?;
        channel.unconfirmed_topups = self.load_topups(&key)?;
        Ok(Some(channel))
    }

    /// Insert or replace a channel together with its topup rows.
    ///
    /// Stamps `mtime` (and `ctime` on first write).
    pub fn set_channel(&mut self, channel: &mut Channel) -> Result<(), StoreError> {
        let now = self.clock.now();
        if channel.ctime == 0 {
            channel.ctime = now;
        }
        channel.mtime = now;

        let key = channel.key();
        let mut ops: Vec<BatchOperation> = self
            .kv
            .prefix_scan(&topup_prefix(&key))?
            .into_iter()
            .map(|(k, _)| BatchOperation::delete(k))
            .collect();
        for (tx_hash, amount) in &channel.unconfirmed_topups {
            ops.push(BatchOperation::put(
                topup_key(&key, tx_hash),
                serde_json::to_vec(amount)?,
            ));
        }
        ops.push(BatchOperation::put(channel_key(&key), serde_json::to_vec(channel)?));
        self.kv.atomic_batch_write(ops)
    }

    /// Remove a channel and its topup rows. Returns whether it existed.
    pub fn del_channel(&mut self, sender: Address, open_block_number: u32) -> Result<bool, StoreError> {
        let key = ChannelKey::new(sender, open_block_number);
        let row = channel_key(&key);
        let existed = self.kv.exists(&row)?;
        let mut ops: Vec<BatchOperation> = self
            .kv
            .prefix_scan(&topup_prefix(&key))?
            .into_iter()
            .map(|(k, _)| BatchOperation::delete(k))
            .collect();
        ops.push(BatchOperation::delete(row));
        self.kv.atomic_batch_write(ops)?;
        Ok(existed)
    }

    /// Every channel, ordered by key.
    pub fn all_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let mut topups: BTreeMap<ChannelKey, BTreeMap<TxHash, U256>> = BTreeMap::new();
        for (raw_key, value) in self.kv.prefix_scan(TOPUP_PREFIX)? {
            let (key, tx_hash) = parse_topup_key(&raw_key)?;
            topups
                .entry(key)
                .or_default()
                .insert(tx_hash, serde_json::from_slice(&value)?);
        }

        let mut channels = Vec::new();
        for (_, value) in self.kv.prefix_scan(CHANNEL_PREFIX)? {
            let mut channel: Channel = serde_json::from_slice(&value)?;
            if let Some(t) = topups.remove(&channel.key()) {
                channel.unconfirmed_topups = t;
            }
            channels.push(channel);
        }
        channels.sort_by_key(|c| c.key());
        Ok(channels)
    }

    /// Channels in the confirmed (or unconfirmed) set.
    pub fn channels(&self, confirmed: bool) -> Result<Vec<Channel>, StoreError> {
        Ok(self
            .all_channels()?
            .into_iter()
            .filter(|c| c.confirmed == confirmed)
            .collect())
    }

    /// Confirmed channels whose close is waiting for funds.
    pub fn pending_channels(&self) -> Result<Vec<Channel>, StoreError> {
        Ok(self
            .channels(true)?
            .into_iter()
            .filter(|c| c.state == ChannelState::ClosePending)
            .collect())
    }

    pub fn n_channels(&self) -> Result<usize, StoreError> {
        Ok(self.kv.prefix_scan(CHANNEL_PREFIX)?.len())
    }

    pub fn n_open_channels(&self) -> Result<usize, StoreError> {
        Ok(self.all_channels()?.iter().filter(|c| c.is_open()).count())
    }

    /// Deletes for every unconfirmed channel row and its topup rows.
    fn unconfirmed_channel_ops(&self) -> Result<(Vec<BatchOperation>, usize), StoreError> {
        let mut ops = Vec::new();
        let unconfirmed = self.channels(false)?;
        for channel in &unconfirmed {
            let key = channel.key();
            ops.extend(
                self.kv
                    .prefix_scan(&topup_prefix(&key))?
                    .into_iter()
                    .map(|(k, _)| BatchOperation::delete(k)),
            );
            ops.push(BatchOperation::delete(channel_key(&key)));
        }
        Ok((ops, unconfirmed.len()))
    }

    fn topup_ops(&self) -> Result<(Vec<BatchOperation>, usize), StoreError> {
        let rows = self.kv.prefix_scan(TOPUP_PREFIX)?;
        let count = rows.len();
        let ops = rows
            .into_iter()
            .map(|(k, _)| BatchOperation::delete(k))
            .collect();
        Ok((ops, count))
    }

    /// Drop every channel not yet confirmed.
    pub fn del_unconfirmed_channels(&mut self) -> Result<usize, StoreError> {
        let (ops, removed) = self.unconfirmed_channel_ops()?;
        self.kv.atomic_batch_write(ops)?;
        Ok(removed)
    }

    /// Forget every unconfirmed topup on every channel.
    pub fn clear_unconfirmed_topups(&mut self) -> Result<usize, StoreError> {
        let (ops, count) = self.topup_ops()?;
        self.kv.atomic_batch_write(ops)?;
        Ok(count)
    }

    /// Drop unconfirmed channels and topups and rewind the unconfirmed
    /// cursor onto the confirmed one, in one commit.
    ///
    /// Returns the number of channels removed.
    pub fn reset_unconfirmed(&mut self) -> Result<usize, StoreError> {
        let (mut ops, removed) = self.unconfirmed_channel_ops()?;
        let (topups, _) = self.topup_ops()?;
        ops.extend(topups);

        let mut state = self.sync_state()?;
        state.rewind_unconfirmed();
        ops.push(BatchOperation::put(SYNCSTATE_KEY, serde_json::to_vec(&state)?));

        self.kv.atomic_batch_write(ops)?;
        Ok(removed)
    }
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStore")
            .field("identity", &self.identity)
            .field("locked", &self._lock.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryKVStore;
    use shared_types::BlockHash;

    struct FixedClock(Timestamp);

    impl TimeSource for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn identity() -> StoreIdentity {
        StoreIdentity {
            network_id: 65536,
            contract_address: Address::repeat_byte(0xC0),
            receiver: Address::repeat_byte(0xEE),
        }
    }

    fn store() -> ChannelStore {
        ChannelStore::in_memory(identity())
            .unwrap()
            .with_clock(Arc::new(FixedClock(1_700_000_000)))
    }

    fn channel(sender: u8, block: u32, confirmed: bool) -> Channel {
        let mut c = Channel::new(
            Address::repeat_byte(sender),
            identity().receiver,
            block,
            U256::from(100u64),
        );
        c.confirmed = confirmed;
        c
    }

    #[test]
    fn test_set_get_roundtrip_with_topups() {
        let mut store = store();
        let mut c = channel(1, 10, true);
        c.unconfirmed_topups.insert(TxHash::repeat_byte(0xAA), U256::from(7u64));
        store.set_channel(&mut c).unwrap();

        let loaded = store.get_channel(c.sender, 10).unwrap().unwrap();
        assert_eq!(loaded, c);
        assert_eq!(loaded.ctime, 1_700_000_000);
        assert_eq!(loaded.unconfirmed_deposit(), U256::from(107u64));
    }

    #[test]
    fn test_set_channel_replaces_topup_rows() {
        let mut store = store();
        let mut c = channel(1, 10, true);
        c.unconfirmed_topups.insert(TxHash::repeat_byte(0xAA), U256::from(7u64));
        store.set_channel(&mut c).unwrap();

        c.unconfirmed_topups.clear();
        c.deposit = U256::from(107u64);
        store.set_channel(&mut c).unwrap();

        let loaded = store.get_channel(c.sender, 10).unwrap().unwrap();
        assert!(loaded.unconfirmed_topups.is_empty());
        assert_eq!(loaded.deposit, U256::from(107u64));
    }

    #[test]
    fn test_confirmed_and_unconfirmed_sets_are_disjoint() {
        let mut store = store();
        store.set_channel(&mut channel(1, 10, true)).unwrap();
        store.set_channel(&mut channel(2, 11, false)).unwrap();
        store.set_channel(&mut channel(3, 12, true)).unwrap();

        assert_eq!(store.channels(true).unwrap().len(), 2);
        assert_eq!(store.channels(false).unwrap().len(), 1);
        assert_eq!(store.n_channels().unwrap(), 3);

        // Same key again with confirmed = true replaces, never duplicates
        store.set_channel(&mut channel(2, 11, true)).unwrap();
        assert_eq!(store.channels(true).unwrap().len(), 3);
        assert!(store.channels(false).unwrap().is_empty());
    }

    #[test]
    fn test_del_channel_removes_topups() {
        let mut store = store();
        let mut c = channel(1, 10, true);
        c.unconfirmed_topups.insert(TxHash::repeat_byte(0xAA), U256::from(7u64));
        store.set_channel(&mut c).unwrap();

        assert!(store.del_channel(c.sender, 10).unwrap());
        assert!(!store.del_channel(c.sender, 10).unwrap());
        assert_eq!(store.clear_unconfirmed_topups().unwrap(), 0);
    }

    #[test]
    fn test_pending_and_open_counts() {
        let mut store = store();
        let mut pending = channel(1, 10, true);
        pending.state = ChannelState::ClosePending;
        store.set_channel(&mut pending).unwrap();
        store.set_channel(&mut channel(2, 11, true)).unwrap();

        let pending = store.pending_channels().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender, Address::repeat_byte(1));
        assert_eq!(store.n_open_channels().unwrap(), 1);
    }

    #[test]
    fn test_reset_unconfirmed() {
        let mut store = store();
        let mut confirmed = channel(1, 10, true);
        confirmed.unconfirmed_topups.insert(TxHash::repeat_byte(0xAA), U256::from(7u64));
        store.set_channel(&mut confirmed).unwrap();
        store.set_channel(&mut channel(2, 20, false)).unwrap();
        store
            .update_sync_state(|s| {
                s.confirmed_head_number = Some(15);
                s.confirmed_head_hash = Some(BlockHash::repeat_byte(1));
                s.unconfirmed_head_number = Some(25);
                s.unconfirmed_head_hash = Some(BlockHash::repeat_byte(2));
            })
            .unwrap();

        assert_eq!(store.reset_unconfirmed().unwrap(), 1);

        let remaining = store.all_channels().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].confirmed);
        assert!(remaining[0].unconfirmed_topups.is_empty());

        let state = store.sync_state().unwrap();
        assert_eq!(state.unconfirmed_head_number, Some(15));
        assert_eq!(state.unconfirmed_head_hash, Some(BlockHash::repeat_byte(1)));
    }

    #[test]
    fn test_del_unconfirmed_channels_keeps_confirmed() {
        let mut store = store();
        store.set_channel(&mut channel(1, 10, true)).unwrap();
        let mut tentative = channel(2, 20, false);
        tentative.unconfirmed_topups.insert(TxHash::repeat_byte(0xBB), U256::one());
        store.set_channel(&mut tentative).unwrap();

        assert_eq!(store.del_unconfirmed_channels().unwrap(), 1);
        assert_eq!(store.n_channels().unwrap(), 1);
        assert_eq!(store.clear_unconfirmed_topups().unwrap(), 0);
    }

    #[test]
    fn test_identity_mismatch_rejected() {
        let mut kv = InMemoryKVStore::new();
        kv.put(METADATA_KEY, &serde_json::to_vec(&identity()).unwrap())
            .unwrap();

        let other = StoreIdentity {
            receiver: Address::repeat_byte(0x01),
            ..identity()
        };
        match ChannelStore::open(Box::new(kv), other) {
            Err(StoreError::IdentityMismatch { field, .. }) => assert_eq!(field, "receiver"),
            other => panic!("expected IdentityMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_state_defaults_to_unset() {
        let store = store();
        assert_eq!(store.sync_state().unwrap(), SyncState::default());
    }
}
