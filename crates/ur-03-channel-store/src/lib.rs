//! # Channel Store (UR-03)
//!
//! Durable, transactional store of one receiver's channels and sync cursors.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): `Channel`, `ChannelState`, `SyncState`,
//!   `StoreIdentity`, `StoreError`, `LockError`
//! - **Ports Layer** (`ports/`): `KeyValueStore` with atomic batches, `TimeSource`
//! - **Adapters** (`adapters/`): `InMemoryKVStore`, `FileBackedKVStore`
//!   (checksummed append-only log with compaction), `RocksDbStore`
//!   (feature `rocksdb`), `StateLock` (fs2)
//! - **Service Layer** (`service.rs`): `ChannelStore`
//!
//! ## Invariants
//!
//! - A channel row is either confirmed or unconfirmed, never both: the key
//!   `(sender, open_block_number)` maps to exactly one row
//! - Channel row and topup rows are written in one batch
//! - A state file is bound to one `(network, contract, receiver)` identity
//! - Only one process may hold a state file at a time

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::file::FileBackedKVStore;
pub use adapters::lock::StateLock;
pub use adapters::memory::InMemoryKVStore;
#[cfg(feature = "rocksdb")]
pub use adapters::rocksdb_adapter::{RocksDbConfig, RocksDbStore};
pub use domain::entities::{Channel, ChannelState, StorageBackend, StoreIdentity, SyncState, Timestamp};
pub use domain::errors::{LockError, StoreError};
pub use ports::outbound::{BatchOperation, KeyValueStore, SystemTimeSource, TimeSource};
pub use service::ChannelStore;
