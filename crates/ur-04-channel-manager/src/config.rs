//! # Manager Configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use ur_02_onchain_gateway::NetworkConfig;
use ur_03_channel_store::StorageBackend;

/// Channel manager configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// State file; `None` keeps everything in memory.
    pub state_path: Option<PathBuf>,

    /// On-disk format of `state_path`.
    #[serde(default)]
    pub storage: StorageBackend,

    pub network: NetworkConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            state_path: Some(PathBuf::from("uraiden-receiver.db")),
            storage: StorageBackend::File,
            network: NetworkConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a config for testing (in-memory state, simulated network).
    pub fn for_testing() -> Self {
        Self {
            state_path: None,
            storage: StorageBackend::File,
            network: NetworkConfig::for_testing(),
        }
    }
}
