//! Sync loop against the simulated chain: confirmation depth, dispatch
//! order, reorgs and loop lifecycle.

use primitive_types::U256;
use std::sync::Arc;
use std::time::Duration;
use ur_01_crypto_protocol::LocalSigner;
use ur_02_onchain_gateway::{ChannelContract, SettlementGateway, SimulatedChain};
use ur_03_channel_store::ChannelState;
use ur_04_channel_manager::{ChainEventHandler, ChannelManager, ManagerConfig};
use ur_05_blockchain_sync::{BlockchainSync, SyncConfig, SyncError};

struct Fixture {
    chain: Arc<SimulatedChain>,
    contract: ChannelContract,
    manager: Arc<ChannelManager>,
    sync: Arc<BlockchainSync>,
    sender: LocalSigner,
    receiver: LocalSigner,
}

fn tokens(n: u64) -> U256 {
    U256::from(n)
}

async fn setup() -> Fixture {
    let config = ManagerConfig::for_testing();
    let chain = Arc::new(SimulatedChain::new(config.network.clone()));
    let sender = LocalSigner::random();
    let receiver = LocalSigner::random();
    for who in [sender.address(), receiver.address()] {
        chain.fund_ether(who, U256::exp10(18));
    }
    chain.mint_tokens(sender.address(), tokens(100));

    let contract = ChannelContract::new(chain.clone(), config.network.clone());
    let manager = Arc::new(
        ChannelManager::new(chain.clone(), receiver.clone(), config)
            .await
            .unwrap(),
    );
    let sync = Arc::new(BlockchainSync::new(
        manager.clone(),
        chain.clone(),
        SyncConfig::for_testing(),
    ));
    Fixture {
        chain,
        contract,
        manager,
        sync,
        sender,
        receiver,
    }
}

impl Fixture {
    async fn open(&self, deposit: U256) -> u32 {
        self.contract
            .create_channel_erc223(&self.sender, self.receiver.address(), deposit)
            .await
            .unwrap();
        self.chain.block_number().await.unwrap() as u32
    }

    /// Tick until the unconfirmed head reaches the chain tip.
    async fn catch_up(&self) {
        let current = self.chain.block_number().await.unwrap();
        for _ in 0..100 {
            self.sync.poll_once().await.unwrap();
            let state = self.manager.sync_state().await.unwrap();
            if state.unconfirmed_head_number == Some(current) {
                return;
            }
        }
        panic!("sync did not reach block {current}");
    }

    /// Mine past the confirmation depth and catch up.
    async fn confirm(&self) {
        self.chain.mine(2);
        self.catch_up().await;
    }

    async fn pay(&self, block: u32, balance: U256) {
        let proof = self
            .sender
            .sign_balance_proof(self.receiver.address(), block, balance, self.manager.contract_address())
            .unwrap();
        self.manager
            .register_payment(self.sender.address(), block, balance, proof)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_channel_confirmed_after_depth() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;

    f.catch_up().await;
    let pending = f.manager.unconfirmed_channels().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].open_block_number, block);
    assert!(f.manager.channels().await.unwrap().is_empty());

    f.confirm().await;
    let channels = f.manager.channels().await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].deposit, tokens(50));
    assert!(f.manager.unconfirmed_channels().await.unwrap().is_empty());
    assert!(f.manager.status().is_synced());
}

#[tokio::test]
async fn test_chunked_catch_up() {
    let f = setup().await;
    f.chain.mine(13);
    let block = f.open(tokens(50)).await;
    f.chain.mine(6);

    // Chunks of four blocks: several ticks before the tip
    f.sync.poll_once().await.unwrap();
    assert!(!f.manager.status().is_synced());
    f.catch_up().await;

    let channel = f
        .manager
        .get_channel(f.sender.address(), block)
        .await
        .unwrap()
        .unwrap();
    assert!(channel.confirmed);
}

#[tokio::test]
async fn test_topup_tracked_until_confirmed() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;
    f.confirm().await;

    f.contract
        .topup_erc223(&f.sender, f.receiver.address(), block, tokens(25))
        .await
        .unwrap();
    f.catch_up().await;
    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.deposit, tokens(50));
    assert_eq!(channel.unconfirmed_deposit(), tokens(75));

    f.confirm().await;
    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.deposit, tokens(75));
    assert!(channel.unconfirmed_topups.is_empty());
}

#[tokio::test]
async fn test_other_receivers_ignored() {
    let f = setup().await;
    f.contract
        .create_channel_erc223(&f.sender, LocalSigner::random().address(), tokens(10))
        .await
        .unwrap();
    f.confirm().await;
    assert!(f.manager.channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_honest_close_request() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;
    f.confirm().await;
    f.pay(block, tokens(5)).await;

    f.contract
        .uncooperative_close(&f.sender, f.receiver.address(), block, tokens(5))
        .await
        .unwrap();
    let close_block = f.chain.block_number().await.unwrap() as u32;
    f.confirm().await;

    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.state, ChannelState::CloseRequested);
    let challenge = f.manager.config().network.challenge_period;
    assert_eq!(channel.settle_timeout, Some(close_block + challenge));
}

#[tokio::test]
async fn test_cheating_close_disputed_and_settled() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;
    f.confirm().await;
    f.pay(block, tokens(20)).await;

    f.contract
        .uncooperative_close(&f.sender, f.receiver.address(), block, tokens(5))
        .await
        .unwrap();
    f.confirm().await;

    // Disputed with the proven balance, settled immediately
    assert_eq!(f.chain.token_balance(f.receiver.address()).await.unwrap(), tokens(20));
    assert_eq!(f.chain.token_balance(f.sender.address()).await.unwrap(), tokens(80));

    f.confirm().await;
    assert!(f.manager.get_channel(f.sender.address(), block).await.unwrap().is_none());
}

#[tokio::test]
async fn test_receiver_close_forgotten_once_settled() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;
    f.confirm().await;
    f.pay(block, tokens(8)).await;

    f.manager.close_channel(f.sender.address(), block).await.unwrap();
    f.confirm().await;
    assert!(f.manager.get_channel(f.sender.address(), block).await.unwrap().is_none());
    assert_eq!(f.manager.liquid_balance().await.unwrap(), tokens(8));
}

#[tokio::test]
async fn test_withdraw_event_synced() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;
    f.confirm().await;
    f.pay(block, tokens(10)).await;

    let proof = f
        .sender
        .sign_balance_proof(f.receiver.address(), block, tokens(10), f.manager.contract_address())
        .unwrap();
    f.manager.withdraw(block, tokens(10), proof).await.unwrap();
    f.confirm().await;

    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.withdrawn_balance, tokens(10));
    assert!(channel.is_open());
}

#[tokio::test]
async fn test_unconfirmed_reorg_discarded() {
    let f = setup().await;
    f.open(tokens(50)).await;
    f.catch_up().await;
    assert_eq!(f.manager.unconfirmed_channels().await.unwrap().len(), 1);

    // The opening block is replaced by a longer fork without it
    f.chain.reorg(1);
    f.chain.mine(3);
    f.catch_up().await;
    assert!(f.manager.unconfirmed_channels().await.unwrap().is_empty());

    f.confirm().await;
    assert!(f.manager.channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shorter_fork_resets_unconfirmed() {
    let f = setup().await;
    f.chain.mine(4);
    f.open(tokens(50)).await;
    f.catch_up().await;
    assert_eq!(f.manager.unconfirmed_channels().await.unwrap().len(), 1);

    f.chain.reorg(1);
    f.sync.poll_once().await.unwrap();
    assert!(f.manager.unconfirmed_channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_confirmed_reorg_is_fatal() {
    let f = setup().await;
    f.open(tokens(50)).await;
    f.chain.mine(4);
    f.catch_up().await;
    let confirmed = f.manager.sync_state().await.unwrap().confirmed_head_number.unwrap();
    assert_eq!(confirmed, 3);

    f.chain.reorg(4);
    f.chain.mine(4);
    let err = f.sync.poll_once().await.unwrap_err();
    assert!(matches!(err, SyncError::ConfirmedReorg { number: 3, .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_loop_syncs_and_stops() {
    let f = setup().await;
    f.open(tokens(50)).await;
    f.chain.mine(2);
    assert!(!f.manager.node_online());

    let handle = f.sync.spawn();
    tokio::time::timeout(Duration::from_secs(5), f.manager.wait_sync())
        .await
        .unwrap();
    assert!(f.manager.node_online());
    assert_eq!(f.manager.channels().await.unwrap().len(), 1);

    f.sync.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_loop_catches_up_without_waiting_for_poll() {
    let f = setup().await;
    let block = f.open(tokens(50)).await;
    f.chain.mine(40);

    let config = SyncConfig {
        poll_interval: Duration::from_secs(3600),
        ..SyncConfig::for_testing()
    };
    let sync = Arc::new(BlockchainSync::new(f.manager.clone(), f.chain.clone(), config));
    let handle = sync.spawn();

    // Chunks of four blocks; only the first tick comes from the interval
    tokio::time::timeout(Duration::from_secs(5), f.manager.wait_sync())
        .await
        .unwrap();
    let channel = f
        .manager
        .get_channel(f.sender.address(), block)
        .await
        .unwrap()
        .unwrap();
    assert!(channel.confirmed);

    sync.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_loop_tracks_liveness() {
    let f = setup().await;
    let handle = f.sync.spawn();
    tokio::time::timeout(Duration::from_secs(5), f.manager.wait_sync())
        .await
        .unwrap();

    f.chain.set_offline(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while f.manager.node_online() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    f.chain.set_offline(false);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f.manager.node_online() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    f.sync.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_loop_halts_on_confirmed_reorg() {
    let f = setup().await;
    f.open(tokens(50)).await;
    f.chain.mine(4);
    f.catch_up().await;

    // Chain now shorter than the confirmed head
    f.chain.reorg(4);
    let handle = f.sync.spawn();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(SyncError::ConfirmedReorg { .. })));
    assert!(!f.manager.node_online());
}
