//! # Sync Configuration

use serde::{Deserialize, Serialize};
use shared_types::BlockNumber;
use std::time::Duration;

/// Blockchain sync loop configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay between two ticks.
    pub poll_interval: Duration,

    /// Maximum number of blocks scanned per tick.
    pub sync_chunk_size: u64,

    /// Blocks behind the head before an event counts as confirmed.
    pub n_confirmations: u64,

    /// First block scanned on an empty state.
    pub start_block: BlockNumber,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            sync_chunk_size: 100_000,
            n_confirmations: 1,
            start_block: 0,
        }
    }
}

impl SyncConfig {
    /// Create a config for testing (fast polling, small chunks).
    pub fn for_testing() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            sync_chunk_size: 4,
            n_confirmations: 2,
            start_block: 0,
        }
    }
}
