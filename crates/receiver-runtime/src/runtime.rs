//! # Receiver Runtime
//!
//! Wires the channel manager to the sync loop.
//!
//! ## Startup Sequence
//!
//! 1. Open the manager (state file lock, identity check)
//! 2. Spawn the sync loop
//! 3. Wait for the first full sync
//! 4. Retry closes that were parked for lack of funds or connectivity

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use ur_01_crypto_protocol::LocalSigner;
use ur_02_onchain_gateway::SettlementGateway;
use ur_04_channel_manager::{ChannelManager, ManagerConfig, ManagerError};
use ur_05_blockchain_sync::{BlockchainSync, SyncConfig, SyncError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("sync task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("sync loop exited before the first sync")]
    SyncExited,
}

pub struct ReceiverRuntime {
    manager: Arc<ChannelManager>,
    sync: Arc<BlockchainSync>,
    sync_task: Option<JoinHandle<Result<(), SyncError>>>,
}

impl ReceiverRuntime {
    /// Open the manager's state and prepare (not start) the sync loop.
    pub async fn open(
        gateway: Arc<dyn SettlementGateway>,
        signer: LocalSigner,
        manager_config: ManagerConfig,
        sync_config: SyncConfig,
    ) -> Result<Self, RuntimeError> {
        let manager = ChannelManager::new(gateway, signer, manager_config).await?;
        Ok(Self::new(Arc::new(manager), sync_config))
    }

    pub fn new(manager: Arc<ChannelManager>, sync_config: SyncConfig) -> Self {
        let sync = Arc::new(BlockchainSync::new(
            manager.clone(),
            manager.gateway().clone(),
            sync_config,
        ));
        Self {
            manager,
            sync,
            sync_task: None,
        }
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Start syncing and return once the manager has caught up.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        info!(
            "Receiver {:?} on contract {:?}",
            self.manager.receiver_address(),
            self.manager.contract_address()
        );
        let mut task = self.sync.spawn();

        let synced = tokio::select! {
            _ = self.manager.wait_sync() => true,
            finished = &mut task => {
                finished??;
                false
            }
        };
        if !synced {
            return Err(RuntimeError::SyncExited);
        }
        self.sync_task = Some(task);
        info!(
            "Synced, {} open channels",
            self.manager.n_open_channels().await?
        );

        let sent = self.manager.close_pending_channels().await?;
        if !sent.is_empty() {
            info!("Sent {} pending channel closes", sent.len());
        }
        Ok(())
    }

    /// Stop the sync loop and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<(), RuntimeError> {
        info!("Initiating graceful shutdown...");
        self.sync.stop();
        match self.sync_task.take() {
            Some(task) => task.await??,
            None => warn!("Sync loop was never started"),
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Wait for the sync loop to end on its own (fatal error).
    ///
    /// Cancel-safe: dropping the future leaves the loop joinable by `shutdown`.
    pub async fn join(&mut self) -> Result<(), RuntimeError> {
        let Some(task) = self.sync_task.as_mut() else {
            return Ok(());
        };
        let finished = task.await;
        self.sync_task = None;
        finished??;
        Ok(())
    }
}
