//! Shared fixture: a simulated chain, a funded sender and a manager for the
//! receiver. Events are fed to the manager by hand; the sync loop has its
//! own tests.

#![allow(dead_code)]

use primitive_types::U256;
use shared_types::Signature;
use std::sync::Arc;
use ur_01_crypto_protocol::LocalSigner;
use ur_02_onchain_gateway::{ChannelContract, SettlementGateway, SimulatedChain};
use ur_04_channel_manager::{ChainEventHandler, ChannelManager, ManagerConfig};

pub struct Fixture {
    pub chain: Arc<SimulatedChain>,
    pub contract: ChannelContract,
    pub manager: Arc<ChannelManager>,
    pub sender: LocalSigner,
    pub receiver: LocalSigner,
}

pub fn tokens(n: u64) -> U256 {
    U256::from(n)
}

pub fn ether() -> U256 {
    U256::exp10(18)
}

/// Fixture whose receiver can pay for closing transactions.
pub async fn setup() -> Fixture {
    let f = setup_without_gas().await;
    f.chain.fund_ether(f.receiver.address(), ether());
    f
}

/// Fixture whose receiver holds no ether.
pub async fn setup_without_gas() -> Fixture {
    let config = ManagerConfig::for_testing();
    let chain = Arc::new(SimulatedChain::new(config.network.clone()));
    let sender = LocalSigner::random();
    let receiver = LocalSigner::random();
    chain.fund_ether(sender.address(), ether());
    chain.mint_tokens(sender.address(), tokens(100));

    let contract = ChannelContract::new(chain.clone(), config.network.clone());
    let manager = ChannelManager::new(chain.clone(), receiver.clone(), config)
        .await
        .unwrap();
    manager.status().set_connected(true);

    Fixture {
        chain,
        contract,
        manager: Arc::new(manager),
        sender,
        receiver,
    }
}

impl Fixture {
    /// Open a channel on chain without telling the manager.
    pub async fn open_on_chain(&self, deposit: U256) -> u32 {
        self.contract
            .create_channel_erc223(&self.sender, self.receiver.address(), deposit)
            .await
            .unwrap();
        self.chain.block_number().await.unwrap() as u32
    }

    /// Open a channel on chain and deliver its confirmed creation event.
    pub async fn open_channel(&self, deposit: U256) -> u32 {
        let block = self.open_on_chain(deposit).await;
        self.manager
            .event_channel_opened(self.sender.address(), block, deposit)
            .await
            .unwrap();
        block
    }

    pub fn proof(&self, open_block_number: u32, balance: U256) -> Signature {
        self.sender
            .sign_balance_proof(
                self.receiver.address(),
                open_block_number,
                balance,
                self.manager.contract_address(),
            )
            .unwrap()
    }

    /// Register a payment bringing the channel to `balance`.
    pub async fn pay(&self, open_block_number: u32, balance: U256) -> U256 {
        let (_, received) = self
            .manager
            .register_payment(
                self.sender.address(),
                open_block_number,
                balance,
                self.proof(open_block_number, balance),
            )
            .await
            .unwrap();
        received
    }

    pub async fn token_balance(&self, who: &LocalSigner) -> U256 {
        self.chain.token_balance(who.address()).await.unwrap()
    }
}
