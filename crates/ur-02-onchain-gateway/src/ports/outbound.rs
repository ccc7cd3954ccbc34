//! # Outbound Ports
//!
//! The settlement contract as seen from the receiver and the payer.

use crate::domain::entities::{ChannelInfo, EventKind, EventLog, LogFilter};
use crate::domain::errors::GatewayError;
use async_trait::async_trait;
use shared_types::{Address, BlockHash, BlockNumber, TxHash, U256};

/// Chain access scoped to one settlement contract and its token.
///
/// Every method may fail with a transport error; callers decide whether
/// to retry.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Address of the settlement contract this gateway talks to.
    fn contract_address(&self) -> Address;

    /// Address of the channel token.
    fn token_address(&self) -> Address;

    /// Current chain height.
    async fn block_number(&self) -> Result<BlockNumber, GatewayError>;

    /// Hash of the canonical block at `number`, if it exists.
    async fn block_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>, GatewayError>;

    /// Whether a block with this hash is still known to the node.
    async fn block_exists(&self, hash: BlockHash) -> Result<bool, GatewayError>;

    /// Network id reported by the node.
    async fn network_id(&self) -> Result<u64, GatewayError>;

    /// `getChannelInfo`; `None` when the contract reverts (unknown or settled channel).
    async fn channel_info(
        &self,
        sender: Address,
        receiver: Address,
        open_block_number: u32,
    ) -> Result<Option<ChannelInfo>, GatewayError>;

    /// Contract events of one kind in `[from_block, to_block]`, in chain order.
    async fn query_logs(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        to_block: BlockNumber,
        filter: &LogFilter,
    ) -> Result<Vec<EventLog>, GatewayError>;

    /// Broadcast a signed raw transaction.
    async fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxHash, GatewayError>;

    /// Next nonce for `address`, counting pending transactions.
    async fn transaction_count(&self, address: Address) -> Result<u64, GatewayError>;

    /// Ether balance in wei.
    async fn balance(&self, address: Address) -> Result<U256, GatewayError>;

    /// Channel token balance.
    async fn token_balance(&self, address: Address) -> Result<U256, GatewayError>;
}
