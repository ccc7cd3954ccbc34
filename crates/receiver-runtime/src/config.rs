//! # Runtime Configuration
//!
//! Everything the receiver needs comes from `UR_*` environment variables.
//!
//! | Variable | Required | Meaning |
//! |----------|----------|---------|
//! | `UR_RPC_URL` | no (`http://localhost:8545`) | JSON-RPC endpoint |
//! | `UR_PRIVATE_KEY` | yes | receiver key, hex |
//! | `UR_STATE_PATH` | no | state file; in-memory when empty |
//! | `UR_STATE_BACKEND` | no (`file`) | `file`, or `rocksdb` when built with that feature |
//! | `UR_CHAIN_ID` | no (`1`) | selects a known contract deployment |
//! | `UR_CONTRACT_ADDRESS` | unless the chain is known | settlement contract |
//! | `UR_TOKEN_ADDRESS` | yes | channel token |
//! | `UR_CONFIRMATIONS` | no (`1`) | confirmation depth |

use shared_types::{parse_address, Address};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use ur_02_onchain_gateway::NetworkConfig;
use ur_03_channel_store::StorageBackend;
use ur_04_channel_manager::ManagerConfig;
use ur_05_blockchain_sync::SyncConfig;

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

#[derive(Clone)]
pub struct RuntimeConfig {
    pub rpc_url: String,
    /// Hex private key of the receiver.
    pub private_key: String,
    pub manager: ManagerConfig,
    pub sync: SyncConfig,
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let address = |var: &'static str| -> Result<Option<Address>, ConfigError> {
            get(var)
                .map(|raw| parse_address(&raw).map_err(|e| invalid(var, e)))
                .transpose()
        };

        let private_key = get("UR_PRIVATE_KEY").ok_or(ConfigError::Missing("UR_PRIVATE_KEY"))?;
        let chain_id = match get("UR_CHAIN_ID") {
            Some(raw) => raw.parse::<u64>().map_err(|e| invalid("UR_CHAIN_ID", e))?,
            None => 1,
        };

        let mut network = match (NetworkConfig::for_chain(chain_id), address("UR_CONTRACT_ADDRESS")?) {
            (Some(known), None) => known,
            (Some(known), Some(contract)) => NetworkConfig {
                contract_address: contract,
                ..known
            },
            (None, Some(contract)) => NetworkConfig {
                chain_id,
                contract_address: contract,
                ..NetworkConfig::default()
            },
            (None, None) => return Err(ConfigError::Missing("UR_CONTRACT_ADDRESS")),
        };
        network.token_address = address("UR_TOKEN_ADDRESS")?.ok_or(ConfigError::Missing("UR_TOKEN_ADDRESS"))?;

        let n_confirmations = match get("UR_CONFIRMATIONS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| invalid("UR_CONFIRMATIONS", e))?,
            None => SyncConfig::default().n_confirmations,
        };

        let sync = SyncConfig {
            n_confirmations,
            start_block: network.start_block,
            ..SyncConfig::default()
        };
        let storage = match get("UR_STATE_BACKEND").as_deref() {
            None | Some("file") => StorageBackend::File,
            #[cfg(feature = "rocksdb")]
            Some("rocksdb") => StorageBackend::RocksDb,
            Some(other) => return Err(invalid("UR_STATE_BACKEND", format!("unsupported backend {other:?}"))),
        };
        let manager = ManagerConfig {
            state_path: get("UR_STATE_PATH").map(PathBuf::from),
            storage,
            network,
        };

        Ok(Self {
            rpc_url: get("UR_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            private_key,
            manager,
            sync,
        })
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("manager", &self.manager)
            .field("sync", &self.sync)
            .finish()
    }
}
