//! # Channel Contract Service
//!
//! Builds, signs and submits settlement contract transactions for one
//! account, and waits for the events they produce.
//!
//! Nonces are fetched from the gateway before every submission, so one
//! `ChannelContract` must not be used for concurrent submissions from the
//! same account.

use crate::config::NetworkConfig;
use crate::domain::abi::{open_payload, topup_payload, ContractCall, TokenCall};
use crate::domain::entities::{ChannelInfo, EventKind, EventLog, LogFilter};
use crate::domain::errors::GatewayError;
use crate::ports::outbound::SettlementGateway;
use shared_types::{Address, BlockNumber, Signature, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use ur_01_crypto_protocol::{LocalSigner, Transaction};

/// Typed front end of the settlement contract.
#[derive(Clone)]
pub struct ChannelContract {
    gateway: Arc<dyn SettlementGateway>,
    config: NetworkConfig,
}

impl ChannelContract {
    pub fn new(gateway: Arc<dyn SettlementGateway>, config: NetworkConfig) -> Self {
        Self { gateway, config }
    }

    pub fn gateway(&self) -> &Arc<dyn SettlementGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn contract_address(&self) -> Address {
        self.config.contract_address
    }

    /// Sign `data` as a call to `to` and broadcast it.
    pub async fn submit(
        &self,
        signer: &LocalSigner,
        to: Address,
        data: Vec<u8>,
    ) -> Result<TxHash, GatewayError> {
        let nonce = self.gateway.transaction_count(signer.address()).await?;
        let tx = Transaction {
            nonce,
            gas_price: self.config.gas_price,
            gas_limit: self.config.gas_limit,
            to: Some(to),
            value: U256::zero(),
            data,
        };
        let raw = signer.sign_transaction(&tx, self.config.chain_id)?;
        let hash = self.gateway.submit_transaction(raw).await?;
        debug!(
            "[ur-02] Submitted tx {:?} from {:?} (nonce {})",
            hash,
            signer.address(),
            nonce
        );
        Ok(hash)
    }

    async fn call_contract(&self, signer: &LocalSigner, call: ContractCall) -> Result<TxHash, GatewayError> {
        self.submit(signer, self.config.contract_address, call.encode())
            .await
    }

    async fn call_token(&self, signer: &LocalSigner, call: TokenCall) -> Result<TxHash, GatewayError> {
        self.submit(signer, self.config.token_address, call.encode())
            .await
    }

    // =========================================================================
    // SENDER OPERATIONS
    // =========================================================================

    /// Open a channel with a single ERC223 transfer.
    pub async fn create_channel_erc223(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        deposit: U256,
    ) -> Result<TxHash, GatewayError> {
        info!(
            "[ur-02] Opening channel {:?} -> {:?} with deposit {}",
            signer.address(),
            receiver,
            deposit
        );
        self.call_token(
            signer,
            TokenCall::TransferWithData {
                to: self.config.contract_address,
                value: deposit,
                data: open_payload(receiver),
            },
        )
        .await
    }

    /// Top up a channel with a single ERC223 transfer.
    pub async fn topup_erc223(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        open_block_number: u32,
        added_deposit: U256,
    ) -> Result<TxHash, GatewayError> {
        self.call_token(
            signer,
            TokenCall::TransferWithData {
                to: self.config.contract_address,
                value: added_deposit,
                data: topup_payload(receiver, open_block_number),
            },
        )
        .await
    }

    /// Allow the contract to pull `value` tokens (ERC20 flow).
    pub async fn approve(&self, signer: &LocalSigner, value: U256) -> Result<TxHash, GatewayError> {
        self.call_token(
            signer,
            TokenCall::Approve {
                spender: self.config.contract_address,
                value,
            },
        )
        .await
    }

    /// `createChannel`; needs a prior `approve`.
    pub async fn create_channel_erc20(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        deposit: U256,
    ) -> Result<TxHash, GatewayError> {
        self.call_contract(signer, ContractCall::CreateChannel { receiver, deposit })
            .await
    }

    /// `topUpERC20`; needs a prior `approve`.
    pub async fn topup_erc20(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        open_block_number: u32,
        added_deposit: U256,
    ) -> Result<TxHash, GatewayError> {
        self.call_contract(
            signer,
            ContractCall::TopUp {
                receiver,
                open_block_number,
                added_deposit,
            },
        )
        .await
    }

    /// Start the challenge period with the sender's view of the balance.
    pub async fn uncooperative_close(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        open_block_number: u32,
        balance: U256,
    ) -> Result<TxHash, GatewayError> {
        self.call_contract(
            signer,
            ContractCall::UncooperativeClose {
                receiver,
                open_block_number,
                balance,
            },
        )
        .await
    }

    /// Settle after the challenge period.
    pub async fn settle(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        open_block_number: u32,
    ) -> Result<TxHash, GatewayError> {
        self.call_contract(
            signer,
            ContractCall::Settle {
                receiver,
                open_block_number,
            },
        )
        .await
    }

    // =========================================================================
    // SHARED / RECEIVER OPERATIONS
    // =========================================================================

    /// Close and settle immediately with both parties' signatures.
    ///
    /// Either party may submit it.
    pub async fn cooperative_close(
        &self,
        signer: &LocalSigner,
        receiver: Address,
        open_block_number: u32,
        balance: U256,
        balance_signature: Signature,
        closing_signature: Signature,
    ) -> Result<TxHash, GatewayError> {
        self.call_contract(
            signer,
            ContractCall::CooperativeClose {
                receiver,
                open_block_number,
                balance,
                balance_signature,
                closing_signature,
            },
        )
        .await
    }

    /// Withdraw the proven balance without closing (receiver only).
    pub async fn withdraw(
        &self,
        signer: &LocalSigner,
        open_block_number: u32,
        balance: U256,
        balance_signature: Signature,
    ) -> Result<TxHash, GatewayError> {
        self.call_contract(
            signer,
            ContractCall::Withdraw {
                open_block_number,
                balance,
                balance_signature,
            },
        )
        .await
    }

    /// Current on-chain state of a channel.
    pub async fn channel_info(
        &self,
        sender: Address,
        receiver: Address,
        open_block_number: u32,
    ) -> Result<Option<ChannelInfo>, GatewayError> {
        self.gateway
            .channel_info(sender, receiver, open_block_number)
            .await
    }

    /// Poll for the first event of `kind` matching `filter` at or after
    /// `from_block`.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first. Transient errors are
    /// retried until the deadline.
    pub async fn wait_for_event(
        &self,
        kind: EventKind,
        filter: &LogFilter,
        from_block: BlockNumber,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<EventLog>, GatewayError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_event(kind, filter, from_block).await {
                Ok(Some(log)) => return Ok(Some(log)),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    debug!("[ur-02] Retrying event wait after {}", e);
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn find_event(
        &self,
        kind: EventKind,
        filter: &LogFilter,
        from_block: BlockNumber,
    ) -> Result<Option<EventLog>, GatewayError> {
        let head = self.gateway.block_number().await?;
        if head < from_block {
            return Ok(None);
        }
        let logs = self
            .gateway
            .query_logs(kind, from_block, head, filter)
            .await?;
        Ok(logs.into_iter().next())
    }
}

impl std::fmt::Debug for ChannelContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelContract")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
