//! # Blockchain Sync Service
//!
//! Polls the settlement contract for events addressed to the receiver and
//! relays them to the channel manager, twice: once as soon as they are
//! mined (unconfirmed handlers) and again once they are `n_confirmations`
//! deep (confirmed handlers).
//!
//! ## Tick
//!
//! 1. Reorg check (skipped on the first tick): a vanished unconfirmed head
//!    resets all unconfirmed state; a vanished confirmed head halts the loop.
//! 2. Plan the scanned ranges (`plan_tick`).
//! 3. Fetch every log, channel lookup and block hash the tick needs.
//! 4. Dispatch: confirmed events in chain order, then unconfirmed ones.
//! 5. Commit both heads.
//!
//! Nothing is handed to the manager before step 3 has fully succeeded, so
//! a node failure mid-tick leaves no partially applied range behind.
//!
//! ## Liveness
//!
//! Gateway errors clear the shared `connected` flag and the tick is retried
//! on the next interval. Only `SyncError::is_fatal` errors end the loop.

use crate::config::SyncConfig;
use crate::domain::errors::SyncError;
use crate::domain::plan::{plan_tick, BlockRange, TickPlan};
use shared_types::{BlockHash, BlockNumber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use ur_02_onchain_gateway::{ChannelEvent, EventKind, EventLog, GatewayError, LogFilter, SettlementGateway};
use ur_03_channel_store::SyncState;
use ur_04_channel_manager::ChainEventHandler;

/// Event kinds that have unconfirmed handlers.
const UNCONFIRMED_KINDS: [EventKind; 2] = [EventKind::ChannelCreated, EventKind::ChannelToppedUp];

/// A confirmed event plus what the contract says about its channel now.
struct ConfirmedEvent {
    log: EventLog,
    /// For close requests: the live settle block, `None` if the contract no
    /// longer knows the channel. Unused for other events.
    settle_block: Option<u32>,
}

/// Everything one tick needs from the node.
struct Fetched {
    confirmed: Vec<ConfirmedEvent>,
    unconfirmed: Vec<EventLog>,
    confirmed_hash: BlockHash,
    unconfirmed_hash: BlockHash,
}

pub struct BlockchainSync {
    handler: Arc<dyn ChainEventHandler>,
    gateway: Arc<dyn SettlementGateway>,
    config: SyncConfig,
    stopped: AtomicBool,
    ticked: AtomicBool,
    wake: Notify,
}

impl BlockchainSync {
    pub fn new(
        handler: Arc<dyn ChainEventHandler>,
        gateway: Arc<dyn SettlementGateway>,
        config: SyncConfig,
    ) -> Self {
        Self {
            handler,
            gateway,
            config,
            stopped: AtomicBool::new(false),
            ticked: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run the loop on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<(), SyncError>> {
        let sync = Arc::clone(self);
        tokio::spawn(async move { sync.run().await })
    }

    /// Ask the loop to exit after the current tick.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Poll until stopped or a fatal error occurs.
    pub async fn run(&self) -> Result<(), SyncError> {
        info!(
            "[ur-05] Blockchain sync started (poll {:?}, chunk {}, confirmations {})",
            self.config.poll_interval, self.config.sync_chunk_size, self.config.n_confirmations
        );
        let status = self.handler.status();
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            if self.is_stopped() {
                break;
            }

            match self.poll_once().await {
                Ok(()) => {
                    if !status.is_connected() {
                        info!("[ur-05] Connected to node");
                    }
                    status.set_connected(true);
                }
                Err(e) if !e.is_fatal() => {
                    if status.is_connected() {
                        warn!("[ur-05] Lost connection to node: {}", e);
                    } else {
                        debug!("[ur-05] Node still unreachable: {}", e);
                    }
                    status.set_connected(false);
                }
                Err(e) => {
                    error!("[ur-05] Blockchain sync halted: {}", e);
                    status.set_connected(false);
                    return Err(e);
                }
            }
        }

        info!("[ur-05] Blockchain sync stopped");
        Ok(())
    }

    /// Run a single tick.
    pub async fn poll_once(&self) -> Result<(), SyncError> {
        let check_hashes = self.ticked.load(Ordering::SeqCst);
        let current = self.gateway.block_number().await?;
        let mut state = self.handler.sync_state().await?;

        if self.check_reorg(&state, current, check_hashes).await? {
            state = self.handler.sync_state().await?;
        }
        self.ticked.store(true, Ordering::SeqCst);

        let Some(plan) = plan_tick(&state, current, &self.config) else {
            if state.unconfirmed_head_number.is_some_and(|n| n >= current) {
                self.handler.status().mark_synced();
            }
            return Ok(());
        };

        let fetched = self.fetch(&plan).await?;
        let (n_confirmed, n_unconfirmed) = (fetched.confirmed.len(), fetched.unconfirmed.len());
        self.dispatch(fetched.confirmed, fetched.unconfirmed).await?;
        self.handler
            .set_head(
                plan.unconfirmed_head,
                fetched.unconfirmed_hash,
                plan.confirmed_head,
                fetched.confirmed_hash,
            )
            .await?;

        debug!(
            "[ur-05] Synced to {} (confirmed {}, {} confirmed / {} unconfirmed events)",
            plan.unconfirmed_head, plan.confirmed_head, n_confirmed, n_unconfirmed
        );
        if plan.unconfirmed_head < current {
            // Still behind: next chunk without waiting for the interval
            self.wake.notify_one();
        } else {
            self.handler.status().mark_synced();
        }
        Ok(())
    }

    /// Returns whether unconfirmed state was reset.
    async fn check_reorg(&self, state: &SyncState, current: BlockNumber, check_hashes: bool) -> Result<bool, SyncError> {
        if let (Some(number), Some(hash)) = (state.confirmed_head_number, state.confirmed_head_hash) {
            let vanished = current < number || (check_hashes && !self.gateway.block_exists(hash).await?);
            if vanished {
                error!(
                    "[ur-05] Confirmed block {} ({:?}) was reorganized away; confirmation depth too small",
                    number, hash
                );
                return Err(SyncError::ConfirmedReorg { number, hash });
            }
        }

        let mut reorged = state.unconfirmed_head_number.is_some_and(|n| current < n);
        if !reorged && check_hashes {
            if let Some(hash) = state.unconfirmed_head_hash {
                reorged = !self.gateway.block_exists(hash).await?;
            }
        }
        if reorged {
            warn!(
                "[ur-05] Reorg detected below unconfirmed head {:?}, resetting unconfirmed state",
                state.unconfirmed_head_number
            );
            self.handler.reset_unconfirmed().await?;
        }
        Ok(reorged)
    }

    async fn query(&self, kinds: &[EventKind], range: BlockRange) -> Result<Vec<EventLog>, GatewayError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let filter = LogFilter::receiver(self.handler.receiver());
        let mut logs = Vec::new();
        for kind in kinds {
            logs.extend(
                self.gateway
                    .query_logs(*kind, range.from, range.to, &filter)
                    .await?,
            );
        }
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<BlockHash, GatewayError> {
        self.gateway
            .block_hash(number)
            .await?
            .ok_or_else(|| GatewayError::InvalidResponse(format!("block {number} not found")))
    }

    async fn fetch(&self, plan: &TickPlan) -> Result<Fetched, GatewayError> {
        let mut confirmed = Vec::new();
        for log in self.query(&EventKind::ALL, plan.confirmed).await? {
            let settle_block = match &log.event {
                ChannelEvent::CloseRequested {
                    sender,
                    receiver,
                    open_block_number,
                    ..
                } => self
                    .gateway
                    .channel_info(*sender, *receiver, *open_block_number)
                    .await?
                    .map(|info| info.settle_block_number),
                _ => None,
            };
            confirmed.push(ConfirmedEvent { log, settle_block });
        }
        let unconfirmed = self.query(&UNCONFIRMED_KINDS, plan.unconfirmed).await?;

        Ok(Fetched {
            confirmed,
            unconfirmed,
            confirmed_hash: self.block_hash(plan.confirmed_head).await?,
            unconfirmed_hash: self.block_hash(plan.unconfirmed_head).await?,
        })
    }

    async fn dispatch(&self, confirmed: Vec<ConfirmedEvent>, unconfirmed: Vec<EventLog>) -> Result<(), SyncError> {
        let handler = &self.handler;

        for ConfirmedEvent { log, settle_block } in confirmed {
            let key = log.channel_key();
            let (sender, block) = (key.sender, key.open_block_number);
            match log.event {
                ChannelEvent::Created { deposit, .. } => {
                    handler.event_channel_opened(sender, block, deposit).await?;
                }
                ChannelEvent::ToppedUp { added_deposit, .. } => {
                    handler
                        .event_channel_topup(sender, block, log.transaction_hash, added_deposit)
                        .await?;
                }
                ChannelEvent::CloseRequested { balance, .. } => {
                    if !handler.has_confirmed_channel(sender, block).await? {
                        debug!(
                            "[ur-05] Ignoring close request for unknown channel (sender {:?}, block {})",
                            sender, block
                        );
                        continue;
                    }
                    match settle_block {
                        Some(settle_block) => {
                            handler
                                .event_channel_close_requested(sender, block, balance, settle_block)
                                .await?;
                        }
                        None => handler.force_close_channel(sender, block).await?,
                    }
                }
                ChannelEvent::Settled { .. } => {
                    handler.event_channel_settled(sender, block).await?;
                }
                ChannelEvent::Withdraw { withdrawn_balance, .. } => {
                    handler.event_channel_withdraw(sender, block, withdrawn_balance).await?;
                }
            }
        }

        for log in unconfirmed {
            let key = log.channel_key();
            match log.event {
                ChannelEvent::Created { deposit, .. } => {
                    handler
                        .unconfirmed_event_channel_opened(key.sender, key.open_block_number, deposit)
                        .await?;
                }
                ChannelEvent::ToppedUp { added_deposit, .. } => {
                    handler
                        .unconfirmed_event_channel_topup(
                            key.sender,
                            key.open_block_number,
                            log.transaction_hash,
                            added_deposit,
                        )
                        .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockchainSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainSync")
            .field("config", &self.config)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
