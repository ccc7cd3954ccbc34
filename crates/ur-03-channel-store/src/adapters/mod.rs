//! Adapters: storage backends and the advisory state lock.

pub mod file;
pub mod lock;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;
