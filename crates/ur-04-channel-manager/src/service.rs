//! # Channel Manager Service
//!
//! Receiver-side orchestrator. The sync loop feeds it contract events
//! through `ChainEventHandler`; the serving layer calls the command methods.
//!
//! ## Concurrency
//!
//! Every mutating path takes the store mutex first and holds it until the
//! store commit, including across a close transaction's submission. A
//! payment and a topup on the same channel can never interleave their
//! read-modify-write.
//!
//! ## Closing
//!
//! The receiver holds both halves of a cooperative close: the sender's last
//! balance proof and its own closing signature. `close_channel` therefore
//! submits `cooperativeClose` and settles immediately. If the transaction
//! cannot be funded (or the node is unreachable) the channel is parked in
//! `ClosePending` and retried by `close_pending_channels`.

use crate::config::ManagerConfig;
use crate::domain::errors::{ErrorCategory, ManagerError};
use crate::domain::status::SyncStatus;
use crate::ports::inbound::ChainEventHandler;
use async_trait::async_trait;
use shared_types::{Address, BlockHash, BlockNumber, Signature, TxHash, U256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ur_01_crypto_protocol::{verify_balance_proof, LocalSigner};
use ur_02_onchain_gateway::{ChannelContract, GatewayError, SettlementGateway};
use ur_03_channel_store::{Channel, ChannelState, ChannelStore, StoreError, StoreIdentity, SyncState};

/// Receiver-side channel manager.
pub struct ChannelManager {
    store: Mutex<ChannelStore>,
    contract: ChannelContract,
    signer: LocalSigner,
    config: ManagerConfig,
    status: Arc<SyncStatus>,
}

impl ChannelManager {
    /// Open (or create) the receiver's state and bind it to the chain.
    ///
    /// Fails if the state file is locked by another process, has insecure
    /// permissions, or belongs to a different network, contract or receiver.
    pub async fn new(
        gateway: Arc<dyn SettlementGateway>,
        signer: LocalSigner,
        config: ManagerConfig,
    ) -> Result<Self, ManagerError> {
        let network_id = gateway.network_id().await?;
        let identity = StoreIdentity {
            network_id,
            contract_address: config.network.contract_address,
            receiver: signer.address(),
        };
        let store = match &config.state_path {
            Some(path) => ChannelStore::open_path(path, config.storage, identity)?,
            None => ChannelStore::in_memory(identity)?,
        };
        Self::with_store(gateway, signer, config, store)
    }

    /// Wrap an already opened store.
    pub fn with_store(
        gateway: Arc<dyn SettlementGateway>,
        signer: LocalSigner,
        config: ManagerConfig,
        store: ChannelStore,
    ) -> Result<Self, ManagerError> {
        let identity = *store.identity();
        if identity.receiver != signer.address() {
            return Err(StoreError::IdentityMismatch {
                field: "receiver",
                stored: format!("{:?}", identity.receiver),
                configured: format!("{:?}", signer.address()),
            }
            .into());
        }
        if identity.contract_address != config.network.contract_address {
            return Err(StoreError::IdentityMismatch {
                field: "contract_address",
                stored: format!("{:?}", identity.contract_address),
                configured: format!("{:?}", config.network.contract_address),
            }
            .into());
        }

        info!(
            "[ur-04] Channel manager ready (receiver {:?}, contract {:?})",
            signer.address(),
            config.network.contract_address
        );
        Ok(Self {
            store: Mutex::new(store),
            contract: ChannelContract::new(gateway, config.network.clone()),
            signer,
            config,
            status: Arc::new(SyncStatus::new()),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn receiver_address(&self) -> Address {
        self.signer.address()
    }

    pub fn contract_address(&self) -> Address {
        self.config.network.contract_address
    }

    pub fn token_address(&self) -> Address {
        self.config.network.token_address
    }

    pub fn gateway(&self) -> &Arc<dyn SettlementGateway> {
        self.contract.gateway()
    }

    /// Whether the sync loop currently reaches the node.
    pub fn node_online(&self) -> bool {
        self.status.is_connected()
    }

    /// Block until the sync loop has caught up with the chain once.
    pub async fn wait_sync(&self) {
        self.status.wait_synced().await
    }

    // =========================================================================
    // PAYMENTS
    // =========================================================================

    fn verify_with(
        &self,
        store: &ChannelStore,
        sender: Address,
        open_block_number: u32,
        balance: U256,
        signature: &Signature,
    ) -> Result<Channel, ManagerError> {
        let channel = store
            .get_channel(sender, open_block_number)?
            .ok_or(ManagerError::NoOpenChannel {
                sender,
                open_block_number,
            })?;
        if !channel.confirmed {
            return Err(ManagerError::InsufficientConfirmations {
                sender,
                open_block_number,
            });
        }
        if !channel.is_open() {
            return Err(ManagerError::NoOpenChannel {
                sender,
                open_block_number,
            });
        }

        let signer = verify_balance_proof(
            self.signer.address(),
            open_block_number,
            balance,
            signature,
            self.contract_address(),
        )
        .map_err(|e| ManagerError::InvalidBalanceProof(e.to_string()))?;
        if signer != sender {
            return Err(ManagerError::InvalidBalanceProof(format!(
                "recovered signer {signer:?} does not match sender {sender:?}"
            )));
        }
        Ok(channel)
    }

    /// Check a balance proof against a confirmed open channel.
    ///
    /// Does not compare the balance with what was already paid.
    pub async fn verify_balance_proof(
        &self,
        sender: Address,
        open_block_number: u32,
        balance: U256,
        signature: &Signature,
    ) -> Result<Channel, ManagerError> {
        let store = self.store.lock().await;
        self.verify_with(&store, sender, open_block_number, balance, signature)
    }

    /// Accept a payment. Returns the sender and the amount received.
    pub async fn register_payment(
        &self,
        sender: Address,
        open_block_number: u32,
        balance: U256,
        signature: Signature,
    ) -> Result<(Address, U256), ManagerError> {
        let mut store = self.store.lock().await;
        let mut channel = self.verify_with(&store, sender, open_block_number, balance, &signature)?;

        if balance <= channel.balance {
            return Err(ManagerError::InvalidBalanceAmount(format!(
                "balance {balance} does not exceed current {}",
                channel.balance
            )));
        }
        if balance > channel.deposit {
            return Err(ManagerError::InvalidBalanceProof(format!(
                "balance {balance} exceeds deposit {}",
                channel.deposit
            )));
        }

        let received = balance - channel.balance;
        channel.balance = balance;
        channel.last_signature = Some(signature);
        store.set_channel(&mut channel)?;
        debug!(
            "[ur-04] Registered payment of {} (sender {:?}, block {}, balance {})",
            received, sender, open_block_number, balance
        );
        Ok((sender, received))
    }

    // =========================================================================
    // CLOSING
    // =========================================================================

    /// Submit a cooperative close for `channel` with the store held.
    async fn close_with(&self, store: &mut ChannelStore, mut channel: Channel) -> Result<TxHash, ManagerError> {
        let (sender, open_block_number) = (channel.sender, channel.open_block_number);
        let Some(proof) = channel.last_signature else {
            return Err(ManagerError::NoBalanceProofReceived {
                sender,
                open_block_number,
            });
        };
        let closing = self.signer.sign_close(
            sender,
            open_block_number,
            channel.balance,
            self.contract_address(),
        )?;

        // Persist the intent before broadcasting
        channel.state = ChannelState::CloseRequested;
        store.set_channel(&mut channel)?;

        let submitted = self
            .contract
            .cooperative_close(
                &self.signer,
                self.signer.address(),
                open_block_number,
                channel.balance,
                proof,
                closing,
            )
            .await;

        match submitted {
            Ok(tx_hash) => {
                info!(
                    "[ur-04] Sent channel close (sender {:?}, block {}, balance {}, tx {:?})",
                    sender, open_block_number, channel.balance, tx_hash
                );
                Ok(tx_hash)
            }
            Err(e) => {
                let err = ManagerError::from(e);
                if matches!(
                    err.category(),
                    ErrorCategory::FundsExhaustion | ErrorCategory::BlockchainLiveness
                ) {
                    warn!(
                        "[ur-04] Close of (sender {:?}, block {}) parked as pending: {}",
                        sender, open_block_number, err
                    );
                    channel.state = ChannelState::ClosePending;
                    store.set_channel(&mut channel)?;
                }
                Err(err)
            }
        }
    }

    /// Close a channel on-chain with the last balance proof received.
    pub async fn close_channel(&self, sender: Address, open_block_number: u32) -> Result<TxHash, ManagerError> {
        let mut store = self.store.lock().await;
        let channel = store
            .get_channel(sender, open_block_number)?
            .filter(|c| c.state != ChannelState::Closed)
            .ok_or(ManagerError::NoOpenChannel {
                sender,
                open_block_number,
            })?;
        self.close_with(&mut store, channel).await
    }

    /// Sign a closing message for the exact balance last registered.
    pub async fn sign_close(
        &self,
        sender: Address,
        open_block_number: u32,
        balance: U256,
    ) -> Result<Signature, ManagerError> {
        let mut store = self.store.lock().await;
        let mut channel = store
            .get_channel(sender, open_block_number)?
            .filter(Channel::is_open)
            .ok_or(ManagerError::NoOpenChannel {
                sender,
                open_block_number,
            })?;
        if channel.last_signature.is_none() {
            return Err(ManagerError::NoBalanceProofReceived {
                sender,
                open_block_number,
            });
        }
        if balance != channel.balance {
            return Err(ManagerError::InvalidBalanceProof(format!(
                "requested closing balance {balance} does not match latest {}",
                channel.balance
            )));
        }

        let signature = self
            .signer
            .sign_close(sender, open_block_number, balance, self.contract_address())?;
        channel.state = ChannelState::CloseRequested;
        store.set_channel(&mut channel)?;
        info!(
            "[ur-04] Signed cooperative close (sender {:?}, block {})",
            sender, open_block_number
        );
        Ok(signature)
    }

    /// Retry every close that failed for lack of funds or connectivity.
    ///
    /// Returns the transactions sent; failures are logged and stay pending.
    pub async fn close_pending_channels(&self) -> Result<Vec<TxHash>, ManagerError> {
        let mut store = self.store.lock().await;
        let mut sent = Vec::new();
        for channel in store.pending_channels()? {
            let (sender, block) = (channel.sender, channel.open_block_number);
            match self.close_with(&mut store, channel).await {
                Ok(tx_hash) => sent.push(tx_hash),
                Err(ManagerError::Store(e)) => return Err(e.into()),
                Err(e) => warn!(
                    "[ur-04] Pending close (sender {:?}, block {}) still failing: {}",
                    sender, block, e
                ),
            }
        }
        Ok(sent)
    }

    // =========================================================================
    // WITHDRAWALS
    // =========================================================================

    async fn withdraw_with(
        &self,
        store: &mut ChannelStore,
        mut channel: Channel,
        balance: U256,
        signature: Signature,
    ) -> Result<TxHash, ManagerError> {
        if balance > channel.balance {
            return Err(ManagerError::InvalidBalanceAmount(format!(
                "withdrawal of {balance} exceeds registered balance {}",
                channel.balance
            )));
        }
        if balance <= channel.withdrawn_balance {
            return Err(ManagerError::InvalidBalanceAmount(format!(
                "balance {balance} already withdrawn (withdrawn {})",
                channel.withdrawn_balance
            )));
        }

        let tx_hash = self
            .contract
            .withdraw(&self.signer, channel.open_block_number, balance, signature)
            .await?;
        info!(
            "[ur-04] Withdrew {} (sender {:?}, block {}, tx {:?})",
            balance - channel.withdrawn_balance,
            channel.sender,
            channel.open_block_number,
            tx_hash
        );
        channel.withdrawn_balance = balance;
        store.set_channel(&mut channel)?;
        Ok(tx_hash)
    }

    /// Cash out an already proven balance without closing the channel.
    pub async fn withdraw(
        &self,
        open_block_number: u32,
        balance: U256,
        signature: Signature,
    ) -> Result<TxHash, ManagerError> {
        let sender = verify_balance_proof(
            self.signer.address(),
            open_block_number,
            balance,
            &signature,
            self.contract_address(),
        )
        .map_err(|e| ManagerError::InvalidBalanceProof(e.to_string()))?;

        let mut store = self.store.lock().await;
        let channel = self.verify_with(&store, sender, open_block_number, balance, &signature)?;
        self.withdraw_with(&mut store, channel, balance, signature).await
    }

    /// Withdraw from every open channel holding at least `minimum` unpaid.
    pub async fn withdraw_all(&self, minimum: U256) -> Result<Vec<TxHash>, ManagerError> {
        let threshold = minimum.max(U256::one());
        let mut store = self.store.lock().await;
        let mut sent = Vec::new();
        for channel in store.channels(true)? {
            if !channel.is_open() || channel.withdrawable() < threshold {
                continue;
            }
            let Some(signature) = channel.last_signature else {
                continue;
            };
            let (sender, block, balance) = (channel.sender, channel.open_block_number, channel.balance);
            match self.withdraw_with(&mut store, channel, balance, signature).await {
                Ok(tx_hash) => sent.push(tx_hash),
                Err(ManagerError::Store(e)) => return Err(e.into()),
                Err(e) => warn!(
                    "[ur-04] Withdrawal (sender {:?}, block {}) failed: {}",
                    sender, block, e
                ),
            }
        }
        Ok(sent)
    }

    // =========================================================================
    // BALANCES + SNAPSHOTS
    // =========================================================================

    /// Tokens proven to the receiver in confirmed channels and not yet withdrawn.
    pub async fn locked_balance(&self) -> Result<U256, ManagerError> {
        let store = self.store.lock().await;
        Ok(store
            .channels(true)?
            .iter()
            .fold(U256::zero(), |acc, c| acc.saturating_add(c.withdrawable())))
    }

    /// Receiver's token balance outside any channel.
    pub async fn liquid_balance(&self) -> Result<U256, ManagerError> {
        Ok(self.gateway().token_balance(self.signer.address()).await?)
    }

    /// Receiver's ether balance, which pays for closes and withdrawals.
    pub async fn eth_balance(&self) -> Result<U256, ManagerError> {
        Ok(self.gateway().balance(self.signer.address()).await?)
    }

    pub async fn get_channel(&self, sender: Address, open_block_number: u32) -> Result<Option<Channel>, ManagerError> {
        Ok(self.store.lock().await.get_channel(sender, open_block_number)?)
    }

    /// Confirmed channels.
    pub async fn channels(&self) -> Result<Vec<Channel>, ManagerError> {
        Ok(self.store.lock().await.channels(true)?)
    }

    pub async fn unconfirmed_channels(&self) -> Result<Vec<Channel>, ManagerError> {
        Ok(self.store.lock().await.channels(false)?)
    }

    pub async fn pending_channels(&self) -> Result<Vec<Channel>, ManagerError> {
        Ok(self.store.lock().await.pending_channels()?)
    }

    pub async fn n_open_channels(&self) -> Result<usize, ManagerError> {
        Ok(self.store.lock().await.n_open_channels()?)
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("receiver", &self.signer.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CHAIN EVENTS
// =============================================================================

#[async_trait]
impl ChainEventHandler for ChannelManager {
    fn receiver(&self) -> Address {
        self.signer.address()
    }

    fn status(&self) -> Arc<SyncStatus> {
        self.status.clone()
    }

    async fn sync_state(&self) -> Result<SyncState, ManagerError> {
        Ok(self.store.lock().await.sync_state()?)
    }

    async fn set_head(
        &self,
        unconfirmed_head_number: BlockNumber,
        unconfirmed_head_hash: BlockHash,
        confirmed_head_number: BlockNumber,
        confirmed_head_hash: BlockHash,
    ) -> Result<(), ManagerError> {
        self.store.lock().await.update_sync_state(|s| {
            s.unconfirmed_head_number = Some(unconfirmed_head_number);
            s.unconfirmed_head_hash = Some(unconfirmed_head_hash);
            s.confirmed_head_number = Some(confirmed_head_number);
            s.confirmed_head_hash = Some(confirmed_head_hash);
        })?;
        Ok(())
    }

    async fn reset_unconfirmed(&self) -> Result<(), ManagerError> {
        let removed = self.store.lock().await.reset_unconfirmed()?;
        info!("[ur-04] Reset unconfirmed state ({} channels dropped)", removed);
        Ok(())
    }

    async fn unconfirmed_event_channel_opened(
        &self,
        sender: Address,
        open_block_number: u32,
        deposit: U256,
    ) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        if store.get_channel(sender, open_block_number)?.is_some() {
            return Ok(());
        }
        let mut channel = Channel::new(sender, self.signer.address(), open_block_number, deposit);
        store.set_channel(&mut channel)?;
        info!(
            "[ur-04] Unconfirmed channel opened (sender {:?}, block {}, deposit {})",
            sender, open_block_number, deposit
        );
        Ok(())
    }

    async fn event_channel_opened(
        &self,
        sender: Address,
        open_block_number: u32,
        deposit: U256,
    ) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        let previous = store.get_channel(sender, open_block_number)?;
        if previous.as_ref().is_some_and(|c| c.confirmed) {
            return Ok(());
        }

        let mut channel = Channel::new(sender, self.signer.address(), open_block_number, deposit);
        channel.confirmed = true;
        if let Some(previous) = previous {
            channel.ctime = previous.ctime;
            channel.unconfirmed_topups = previous.unconfirmed_topups;
        }
        store.set_channel(&mut channel)?;
        info!(
            "[ur-04] Channel opened (sender {:?}, block {}, deposit {})",
            sender, open_block_number, deposit
        );
        Ok(())
    }

    async fn unconfirmed_event_channel_topup(
        &self,
        sender: Address,
        open_block_number: u32,
        tx_hash: TxHash,
        added_deposit: U256,
    ) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        let Some(mut channel) = store.get_channel(sender, open_block_number)? else {
            warn!(
                "[ur-04] Unconfirmed topup of unknown channel (sender {:?}, block {})",
                sender, open_block_number
            );
            return Ok(());
        };
        if !channel.confirmed {
            debug!(
                "[ur-04] Ignoring unconfirmed topup of unconfirmed channel (sender {:?}, block {}, added {})",
                sender, open_block_number, added_deposit
            );
            return Ok(());
        }
        if !channel.is_open() {
            warn!(
                "[ur-04] Ignoring topup of {} channel (sender {:?}, block {})",
                channel.state, sender, open_block_number
            );
            return Ok(());
        }
        channel.unconfirmed_topups.insert(tx_hash, added_deposit);
        store.set_channel(&mut channel)?;
        info!(
            "[ur-04] Unconfirmed topup (sender {:?}, block {}, added {})",
            sender, open_block_number, added_deposit
        );
        Ok(())
    }

    async fn event_channel_topup(
        &self,
        sender: Address,
        open_block_number: u32,
        tx_hash: TxHash,
        added_deposit: U256,
    ) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        let Some(mut channel) = store.get_channel(sender, open_block_number)? else {
            warn!(
                "[ur-04] Topup of unknown channel (sender {:?}, block {})",
                sender, open_block_number
            );
            return Ok(());
        };
        if !channel.is_open() {
            warn!(
                "[ur-04] Topup of {} channel rejected (sender {:?}, block {})",
                channel.state, sender, open_block_number
            );
            return Ok(());
        }
        channel.deposit = channel.deposit.saturating_add(added_deposit);
        channel.unconfirmed_topups.remove(&tx_hash);
        store.set_channel(&mut channel)?;
        info!(
            "[ur-04] Deposit topped up (sender {:?}, block {}, added {}, deposit {})",
            sender, open_block_number, added_deposit, channel.deposit
        );
        Ok(())
    }

    async fn event_channel_close_requested(
        &self,
        sender: Address,
        open_block_number: u32,
        balance: U256,
        settle_timeout: u32,
    ) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        let Some(mut channel) = store.get_channel(sender, open_block_number)? else {
            warn!(
                "[ur-04] Close requested for unknown channel (sender {:?}, block {})",
                sender, open_block_number
            );
            return Ok(());
        };
        if channel.state == ChannelState::Closed {
            debug!(
                "[ur-04] Ignoring close request for closed channel (sender {:?}, block {})",
                sender, open_block_number
            );
            return Ok(());
        }
        channel.settle_timeout = Some(settle_timeout);
        channel.confirmed = true;

        if balance < channel.balance {
            warn!(
                "[ur-04] Sender tried to cheat, disputing (sender {:?}, block {}, reported {}, proven {})",
                sender, open_block_number, balance, channel.balance
            );
            if !channel.unconfirmed_topups.is_empty() {
                debug!("[ur-04] Disputed channel carries unconfirmed topups; comparing against best-known balance");
            }
            return match self.close_with(&mut store, channel).await {
                Ok(_) => Ok(()),
                Err(ManagerError::Store(e)) => Err(e.into()),
                Err(e) => {
                    warn!("[ur-04] Dispute close failed: {}", e);
                    Ok(())
                }
            };
        }

        channel.state = ChannelState::CloseRequested;
        store.set_channel(&mut channel)?;
        info!(
            "[ur-04] Valid close request (sender {:?}, block {}, settle timeout {})",
            sender, open_block_number, settle_timeout
        );
        Ok(())
    }

    async fn force_close_channel(&self, sender: Address, open_block_number: u32) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        let Some(channel) = store.get_channel(sender, open_block_number)? else {
            return Ok(());
        };
        let mut fallback = channel.clone();

        match self.close_with(&mut store, channel).await {
            Ok(_) => Ok(()),
            Err(ManagerError::NoBalanceProofReceived { .. })
            | Err(ManagerError::Gateway(GatewayError::Reverted(_))) => {
                fallback.state = ChannelState::Closed;
                store.set_channel(&mut fallback)?;
                info!(
                    "[ur-04] Channel marked closed (sender {:?}, block {})",
                    sender, open_block_number
                );
                Ok(())
            }
            Err(ManagerError::Store(e)) => Err(e.into()),
            Err(e) => {
                warn!("[ur-04] Forced close failed: {}", e);
                Ok(())
            }
        }
    }

    async fn event_channel_settled(&self, sender: Address, open_block_number: u32) -> Result<(), ManagerError> {
        let existed = self.store.lock().await.del_channel(sender, open_block_number)?;
        info!(
            "[ur-04] Forgetting settled channel (sender {:?}, block {}, known {})",
            sender, open_block_number, existed
        );
        Ok(())
    }

    async fn event_channel_withdraw(
        &self,
        sender: Address,
        open_block_number: u32,
        withdrawn_balance: U256,
    ) -> Result<(), ManagerError> {
        let mut store = self.store.lock().await;
        let Some(mut channel) = store.get_channel(sender, open_block_number)? else {
            return Ok(());
        };
        if channel.state == ChannelState::Closed {
            debug!(
                "[ur-04] Ignoring withdrawal on closed channel (sender {:?}, block {})",
                sender, open_block_number
            );
            return Ok(());
        }

        // The event carries the delta; the contract holds the total
        match self
            .contract
            .channel_info(sender, self.signer.address(), open_block_number)
            .await
        {
            Ok(Some(info)) if info.transferred_tokens > channel.withdrawn_balance => {
                channel.withdrawn_balance = info.transferred_tokens;
                store.set_channel(&mut channel)?;
            }
            Ok(_) => {}
            Err(e) => warn!("[ur-04] Could not reconcile withdrawal: {}", e),
        }
        info!(
            "[ur-04] Withdrawal of {} confirmed (sender {:?}, block {})",
            withdrawn_balance, sender, open_block_number
        );
        Ok(())
    }

    async fn has_confirmed_channel(&self, sender: Address, open_block_number: u32) -> Result<bool, ManagerError> {
        Ok(self
            .store
            .lock()
            .await
            .get_channel(sender, open_block_number)?
            .is_some_and(|c| c.confirmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ur_02_onchain_gateway::SimulatedChain;

    async fn manager() -> (ChannelManager, LocalSigner) {
        let config = ManagerConfig::for_testing();
        let chain = Arc::new(SimulatedChain::new(config.network.clone()));
        let receiver = LocalSigner::random();
        let manager = ChannelManager::new(chain, receiver.clone(), config).await.unwrap();
        (manager, receiver)
    }

    #[tokio::test]
    async fn test_unconfirmed_channel_reports_insufficient_confirmations() {
        let (manager, receiver) = manager().await;
        let sender = LocalSigner::random();
        manager
            .unconfirmed_event_channel_opened(sender.address(), 5, U256::from(10u64))
            .await
            .unwrap();

        let proof = sender
            .sign_balance_proof(receiver.address(), 5, U256::one(), manager.contract_address())
            .unwrap();
        let err = manager
            .verify_balance_proof(sender.address(), 5, U256::one(), &proof)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::InsufficientConfirmations { .. }));
    }

    #[tokio::test]
    async fn test_store_bound_to_signer() {
        let config = ManagerConfig::for_testing();
        let chain = Arc::new(SimulatedChain::new(config.network.clone()));
        let store = ChannelStore::in_memory(StoreIdentity {
            network_id: config.network.chain_id,
            contract_address: config.network.contract_address,
            receiver: Address::repeat_byte(0x01),
        })
        .unwrap();

        let err = ChannelManager::with_store(chain, LocalSigner::random(), config, store).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Durability);
    }

    #[tokio::test]
    async fn test_settled_event_forgets_channel() {
        let (manager, _) = manager().await;
        let sender = Address::repeat_byte(0x11);
        manager
            .event_channel_opened(sender, 3, U256::from(10u64))
            .await
            .unwrap();
        manager.event_channel_settled(sender, 3).await.unwrap();
        assert!(manager.get_channel(sender, 3).await.unwrap().is_none());

        // Unknown channel: still fine
        manager.event_channel_settled(sender, 3).await.unwrap();
    }
}
