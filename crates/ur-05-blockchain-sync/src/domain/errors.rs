//! # Sync Errors

use shared_types::{BlockHash, BlockNumber};
use thiserror::Error;
use ur_02_onchain_gateway::GatewayError;
use ur_04_channel_manager::ManagerError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Node unreachable or answering garbage; the tick is retried.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A block counted as confirmed was reorganized away. The confirmation
    /// depth is too small for this chain; nothing safe can be done.
    #[error("confirmed head {number} ({hash:?}) is no longer part of the chain")]
    ConfirmedReorg { number: BlockNumber, hash: BlockHash },

    #[error("channel manager failed: {0}")]
    Manager(#[from] ManagerError),
}

impl SyncError {
    /// Whether the loop must halt.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::Gateway(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ur_03_channel_store::StoreError;

    #[test]
    fn test_fatality() {
        assert!(!SyncError::Gateway(GatewayError::Transport("down".into())).is_fatal());
        assert!(SyncError::ConfirmedReorg {
            number: 3,
            hash: BlockHash::zero()
        }
        .is_fatal());
        assert!(SyncError::Manager(ManagerError::Store(StoreError::Io("disk".into()))).is_fatal());
    }
}
