//! # Channel Client
//!
//! Payer-side operations. Every on-chain step submits one transaction and
//! then waits (bounded) for the contract event confirming it; only then is
//! the local record updated.

use crate::config::ClientConfig;
use crate::domain::channel::{ClientChannel, ClientChannelState};
use crate::domain::errors::ClientError;
use shared_types::{Address, BlockNumber, Signature, U256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use ur_01_crypto_protocol::{verify_closing_signature, LocalSigner};
use ur_02_onchain_gateway::{
    ChannelContract, ChannelEvent, EventKind, EventLog, LogFilter, NetworkConfig, SettlementGateway,
};

pub struct ChannelClient {
    contract: ChannelContract,
    signer: LocalSigner,
    config: ClientConfig,
}

impl ChannelClient {
    pub fn new(
        gateway: Arc<dyn SettlementGateway>,
        signer: LocalSigner,
        network: NetworkConfig,
        config: ClientConfig,
    ) -> Self {
        Self {
            contract: ChannelContract::new(gateway, network),
            signer,
            config,
        }
    }

    /// The paying account.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn gateway(&self) -> &Arc<dyn SettlementGateway> {
        self.contract.gateway()
    }

    async fn next_block(&self) -> Result<BlockNumber, ClientError> {
        Ok(self.gateway().block_number().await? + 1)
    }

    async fn wait(&self, kind: EventKind, filter: &LogFilter, from_block: BlockNumber) -> Result<EventLog, ClientError> {
        self.contract
            .wait_for_event(
                kind,
                filter,
                from_block,
                self.config.event_wait_timeout,
                self.config.event_poll_interval,
            )
            .await?
            .ok_or(ClientError::EventTimeout(kind))
    }

    async fn ensure_tokens(&self, needed: U256) -> Result<(), ClientError> {
        let available = self.gateway().token_balance(self.address()).await?;
        if available < needed {
            return Err(ClientError::InsufficientTokens { needed, available });
        }
        Ok(())
    }

    fn filter(channel: &ClientChannel) -> LogFilter {
        LogFilter::channel(channel.sender, channel.receiver, Some(channel.open_block_number))
    }

    fn require_state(
        channel: &ClientChannel,
        state: ClientChannelState,
        operation: &'static str,
    ) -> Result<(), ClientError> {
        if channel.state != state {
            return Err(ClientError::InvalidState {
                operation,
                state: channel.state,
            });
        }
        Ok(())
    }

    // =========================================================================
    // OFF-CHAIN
    // =========================================================================

    /// Balance proof for the channel's current balance.
    pub fn sign(&self, channel: &ClientChannel) -> Result<Signature, ClientError> {
        Ok(self.signer.sign_balance_proof(
            channel.receiver,
            channel.open_block_number,
            channel.balance,
            self.contract.contract_address(),
        )?)
    }

    /// Raise the balance by `value` and sign it.
    pub fn create_transfer(&self, channel: &mut ClientChannel, value: U256) -> Result<Signature, ClientError> {
        Self::require_state(channel, ClientChannelState::Open, "pay through")?;
        if value > channel.remaining() {
            return Err(ClientError::InsufficientChannelFunds {
                needed: value,
                available: channel.remaining(),
            });
        }

        let mut updated = channel.clone();
        updated.balance = channel.balance + value;
        let signature = self.sign(&updated)?;
        updated.balance_signature = Some(signature);
        *channel = updated;
        info!(
            "[ur-06] Signed transfer of {} to {:?} (block {}, balance {})",
            value, channel.receiver, channel.open_block_number, channel.balance
        );
        Ok(signature)
    }

    /// Whether the stored proof matches the balance and fits the deposit.
    pub fn is_valid(&self, channel: &ClientChannel) -> bool {
        channel.balance <= channel.deposit
            && channel.balance_signature.is_some()
            && self.sign(channel).ok() == channel.balance_signature
    }

    // =========================================================================
    // ON-CHAIN
    // =========================================================================

    /// Open a channel to `receiver` with one ERC223 transfer.
    pub async fn open_channel(&self, receiver: Address, deposit: U256) -> Result<ClientChannel, ClientError> {
        if deposit.is_zero() {
            return Err(ClientError::InvalidAmount("deposit must be positive".into()));
        }
        self.ensure_tokens(deposit).await?;

        let from = self.next_block().await?;
        self.contract
            .create_channel_erc223(&self.signer, receiver, deposit)
            .await?;
        let log = self
            .wait(
                EventKind::ChannelCreated,
                &LogFilter::channel(self.address(), receiver, None),
                from,
            )
            .await?;

        let key = log.channel_key();
        let mut channel = ClientChannel::new(self.address(), receiver, key.open_block_number, deposit);
        if let ChannelEvent::Created { deposit, .. } = log.event {
            channel.deposit = deposit;
        }
        channel.balance_signature = Some(self.sign(&channel)?);
        info!(
            "[ur-06] Channel to {:?} opened in block {} (deposit {})",
            receiver, channel.open_block_number, channel.deposit
        );
        Ok(channel)
    }

    /// Add `added_deposit` to an open channel.
    pub async fn topup(&self, channel: &mut ClientChannel, added_deposit: U256) -> Result<(), ClientError> {
        Self::require_state(channel, ClientChannelState::Open, "top up")?;
        if added_deposit.is_zero() {
            return Err(ClientError::InvalidAmount("topup must be positive".into()));
        }
        self.ensure_tokens(added_deposit).await?;

        let from = self.next_block().await?;
        self.contract
            .topup_erc223(&self.signer, channel.receiver, channel.open_block_number, added_deposit)
            .await?;
        let log = self
            .wait(EventKind::ChannelToppedUp, &Self::filter(channel), from)
            .await?;

        channel.deposit = match log.event {
            ChannelEvent::ToppedUp { deposit, .. } => deposit,
            _ => channel.deposit + added_deposit,
        };
        info!(
            "[ur-06] Topped up channel (block {}) to {}",
            channel.open_block_number, channel.deposit
        );
        Ok(())
    }

    /// Request an uncooperative close, optionally at an explicit balance.
    pub async fn close(&self, channel: &mut ClientChannel, balance: Option<U256>) -> Result<(), ClientError> {
        Self::require_state(channel, ClientChannelState::Open, "close")?;
        let mut closing = channel.clone();
        if let Some(balance) = balance {
            if balance > closing.deposit {
                return Err(ClientError::InvalidAmount(format!(
                    "closing balance {balance} exceeds deposit {}",
                    closing.deposit
                )));
            }
            closing.balance = balance;
            closing.balance_signature = Some(self.sign(&closing)?);
        }

        let from = self.next_block().await?;
        self.contract
            .uncooperative_close(&self.signer, closing.receiver, closing.open_block_number, closing.balance)
            .await?;
        self.wait(EventKind::ChannelCloseRequested, &Self::filter(&closing), from)
            .await?;

        closing.state = ClientChannelState::Settling;
        *channel = closing;
        info!(
            "[ur-06] Close requested for channel (block {}) at balance {}",
            channel.open_block_number, channel.balance
        );
        Ok(())
    }

    /// Settle immediately with the receiver's closing signature.
    pub async fn close_cooperatively(
        &self,
        channel: &mut ClientChannel,
        closing_signature: Signature,
    ) -> Result<(), ClientError> {
        if channel.state == ClientChannelState::Closed {
            return Err(ClientError::InvalidState {
                operation: "close",
                state: channel.state,
            });
        }
        let signer = verify_closing_signature(
            channel.sender,
            channel.open_block_number,
            channel.balance,
            &closing_signature,
            self.contract.contract_address(),
        )?;
        if signer != channel.receiver {
            return Err(ClientError::InvalidClosingSignature(channel.receiver));
        }
        let balance_signature = match channel.balance_signature {
            Some(signature) => signature,
            None => self.sign(channel)?,
        };

        let from = self.next_block().await?;
        self.contract
            .cooperative_close(
                &self.signer,
                channel.receiver,
                channel.open_block_number,
                channel.balance,
                balance_signature,
                closing_signature,
            )
            .await?;
        self.wait(EventKind::ChannelSettled, &Self::filter(channel), from)
            .await?;

        channel.state = ClientChannelState::Closed;
        info!(
            "[ur-06] Channel (block {}) closed cooperatively at balance {}",
            channel.open_block_number, channel.balance
        );
        Ok(())
    }

    /// Settle after the challenge period.
    pub async fn settle(&self, channel: &mut ClientChannel) -> Result<(), ClientError> {
        Self::require_state(channel, ClientChannelState::Settling, "settle")?;
        let info = self
            .contract
            .channel_info(channel.sender, channel.receiver, channel.open_block_number)
            .await?
            .ok_or(ClientError::UnknownChannel)?;

        let current = self.gateway().block_number().await?;
        let settle_block = BlockNumber::from(info.settle_block_number);
        if current < settle_block {
            return Err(ClientError::ChallengePeriod {
                remaining: settle_block - current,
            });
        }

        let from = current + 1;
        self.contract
            .settle(&self.signer, channel.receiver, channel.open_block_number)
            .await?;
        self.wait(EventKind::ChannelSettled, &Self::filter(channel), from)
            .await?;

        channel.state = ClientChannelState::Closed;
        info!("[ur-06] Channel (block {}) settled", channel.open_block_number);
        Ok(())
    }

    /// Merge a locally stored channel list with the contract's history.
    ///
    /// Recovers channels and deposits lost locally; balance proofs cannot
    /// be recovered. Settled channels are dropped.
    pub async fn sync_channels(&self, local: Vec<ClientChannel>) -> Result<Vec<ClientChannel>, ClientError> {
        let head = self.gateway().block_number().await?;
        let start = self.contract.config().start_block;
        let filter = LogFilter {
            sender: Some(self.address()),
            ..LogFilter::default()
        };

        let mut logs = Vec::new();
        for kind in [
            EventKind::ChannelCreated,
            EventKind::ChannelToppedUp,
            EventKind::ChannelCloseRequested,
            EventKind::ChannelSettled,
        ] {
            logs.extend(self.gateway().query_logs(kind, start, head, &filter).await?);
        }
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut channels: BTreeMap<(Address, u32), ClientChannel> = local
            .into_iter()
            .filter(|c| c.sender == self.address())
            .map(|c| ((c.receiver, c.open_block_number), c))
            .collect();

        for log in logs {
            let id = (log.event.receiver(), log.channel_key().open_block_number);
            match log.event {
                ChannelEvent::Created { receiver, deposit, .. } => {
                    channels
                        .entry(id)
                        .and_modify(|c| c.deposit = deposit)
                        .or_insert_with(|| ClientChannel::new(self.address(), receiver, id.1, deposit));
                }
                ChannelEvent::ToppedUp { deposit, .. } => match channels.get_mut(&id) {
                    Some(c) => c.deposit = deposit,
                    None => warn!("[ur-06] Topup of unknown channel (block {})", id.1),
                },
                ChannelEvent::CloseRequested { .. } => {
                    if let Some(c) = channels.get_mut(&id) {
                        c.state = ClientChannelState::Settling;
                    }
                }
                ChannelEvent::Settled { .. } => {
                    if let Some(c) = channels.get_mut(&id) {
                        c.state = ClientChannelState::Closed;
                    }
                }
                ChannelEvent::Withdraw { .. } => {}
            }
        }

        let synced: Vec<ClientChannel> = channels
            .into_values()
            .filter(|c| c.state != ClientChannelState::Closed)
            .collect();
        info!("[ur-06] Synced {} channels", synced.len());
        Ok(synced)
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("address", &self.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
