//! # Inbound Ports
//!
//! What the blockchain sync loop drives. Implemented by `ChannelManager`.

use crate::domain::errors::ManagerError;
use crate::domain::status::SyncStatus;
use async_trait::async_trait;
use shared_types::{Address, BlockHash, BlockNumber, TxHash, U256};
use std::sync::Arc;
use ur_03_channel_store::SyncState;

/// Contract events relayed by the sync loop, plus the sync cursors.
///
/// Every handler is idempotent with respect to the store: replaying an
/// event leaves the same state. Errors returned here are durability
/// failures; chain-side failures are handled inside the handler.
#[async_trait]
pub trait ChainEventHandler: Send + Sync {
    /// Receiver whose events are being relayed.
    fn receiver(&self) -> Address;

    /// Liveness and sync signals.
    fn status(&self) -> Arc<SyncStatus>;

    async fn sync_state(&self) -> Result<SyncState, ManagerError>;

    /// Commit both cursors at once.
    async fn set_head(
        &self,
        unconfirmed_head_number: BlockNumber,
        unconfirmed_head_hash: BlockHash,
        confirmed_head_number: BlockNumber,
        confirmed_head_hash: BlockHash,
    ) -> Result<(), ManagerError>;

    /// Drop unconfirmed channels and topups, rewind the unconfirmed cursor.
    async fn reset_unconfirmed(&self) -> Result<(), ManagerError>;

    async fn unconfirmed_event_channel_opened(
        &self,
        sender: Address,
        open_block_number: u32,
        deposit: U256,
    ) -> Result<(), ManagerError>;

    async fn event_channel_opened(
        &self,
        sender: Address,
        open_block_number: u32,
        deposit: U256,
    ) -> Result<(), ManagerError>;

    async fn unconfirmed_event_channel_topup(
        &self,
        sender: Address,
        open_block_number: u32,
        tx_hash: TxHash,
        added_deposit: U256,
    ) -> Result<(), ManagerError>;

    async fn event_channel_topup(
        &self,
        sender: Address,
        open_block_number: u32,
        tx_hash: TxHash,
        added_deposit: U256,
    ) -> Result<(), ManagerError>;

    async fn event_channel_close_requested(
        &self,
        sender: Address,
        open_block_number: u32,
        balance: U256,
        settle_timeout: u32,
    ) -> Result<(), ManagerError>;

    /// Close requested for a channel the contract no longer knows.
    async fn force_close_channel(&self, sender: Address, open_block_number: u32) -> Result<(), ManagerError>;

    async fn event_channel_settled(&self, sender: Address, open_block_number: u32) -> Result<(), ManagerError>;

    async fn event_channel_withdraw(
        &self,
        sender: Address,
        open_block_number: u32,
        withdrawn_balance: U256,
    ) -> Result<(), ManagerError>;

    /// Whether the key is known as a confirmed channel.
    async fn has_confirmed_channel(&self, sender: Address, open_block_number: u32) -> Result<bool, ManagerError>;
}
