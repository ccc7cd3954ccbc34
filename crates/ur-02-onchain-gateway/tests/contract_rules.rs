//! Settlement contract behavior on the simulated chain, driven through
//! `ChannelContract` with real signed transactions.

use std::sync::Arc;
use ur_01_crypto_protocol::LocalSigner;
use ur_02_onchain_gateway::{
    ChannelContract, ChannelEvent, EventKind, GatewayError, LogFilter, NetworkConfig,
    SettlementGateway, SimulatedChain,
};
use primitive_types::U256;

struct Fixture {
    chain: Arc<SimulatedChain>,
    contract: ChannelContract,
    sender: LocalSigner,
    receiver: LocalSigner,
}

fn tokens(n: u64) -> U256 {
    U256::from(n)
}

fn setup() -> Fixture {
    let config = NetworkConfig::for_testing();
    let chain = Arc::new(SimulatedChain::new(config.clone()));
    let sender = LocalSigner::random();
    let receiver = LocalSigner::random();
    for who in [sender.address(), receiver.address()] {
        chain.fund_ether(who, U256::exp10(18));
    }
    chain.mint_tokens(sender.address(), tokens(100));
    let contract = ChannelContract::new(chain.clone(), config);
    Fixture {
        chain,
        contract,
        sender,
        receiver,
    }
}

/// Open a 50-token channel and return its open block.
async fn open(f: &Fixture) -> u32 {
    f.contract
        .create_channel_erc223(&f.sender, f.receiver.address(), tokens(50))
        .await
        .unwrap();
    f.chain.block_number().await.unwrap() as u32
}

#[tokio::test]
async fn test_erc223_open_and_topup() {
    let f = setup();
    let block = open(&f).await;

    let info = f
        .contract
        .channel_info(f.sender.address(), f.receiver.address(), block)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.deposit, tokens(50));
    assert_eq!(info.settle_block_number, 0);

    f.contract
        .topup_erc223(&f.sender, f.receiver.address(), block, tokens(25))
        .await
        .unwrap();

    let head = f.chain.block_number().await.unwrap();
    let logs = f
        .chain
        .query_logs(
            EventKind::ChannelToppedUp,
            0,
            head,
            &LogFilter::receiver(f.receiver.address()),
        )
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    match &logs[0].event {
        ChannelEvent::ToppedUp {
            added_deposit,
            deposit,
            open_block_number,
            ..
        } => {
            assert_eq!(*added_deposit, tokens(25));
            assert_eq!(*deposit, tokens(75));
            assert_eq!(*open_block_number, block);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        f.chain.token_balance(f.sender.address()).await.unwrap(),
        tokens(25)
    );
}

#[tokio::test]
async fn test_created_event_keyed_by_mined_block() {
    let f = setup();
    let block = open(&f).await;

    let logs = f
        .chain
        .query_logs(
            EventKind::ChannelCreated,
            0,
            u64::from(block),
            &LogFilter::receiver(f.receiver.address()),
        )
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    let key = logs[0].channel_key();
    assert_eq!(key.sender, f.sender.address());
    assert_eq!(key.open_block_number, block);
}

#[tokio::test]
async fn test_zero_value_topup_reverts() {
    let f = setup();
    let block = open(&f).await;
    let head = f.chain.block_number().await.unwrap();

    let err = f
        .contract
        .topup_erc223(&f.sender, f.receiver.address(), block, U256::zero())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Reverted(_)));
    // Nothing was mined and the nonce did not move
    assert_eq!(f.chain.block_number().await.unwrap(), head);
    assert_eq!(f.chain.transaction_count(f.sender.address()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_erc20_flow_needs_allowance() {
    let f = setup();
    let err = f
        .contract
        .create_channel_erc20(&f.sender, f.receiver.address(), tokens(10))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Reverted(_)));

    f.contract.approve(&f.sender, tokens(30)).await.unwrap();
    f.contract
        .create_channel_erc20(&f.sender, f.receiver.address(), tokens(10))
        .await
        .unwrap();
    let block = f.chain.block_number().await.unwrap() as u32;
    f.contract
        .topup_erc20(&f.sender, f.receiver.address(), block, tokens(20))
        .await
        .unwrap();

    let info = f
        .contract
        .channel_info(f.sender.address(), f.receiver.address(), block)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.deposit, tokens(30));
}

#[tokio::test]
async fn test_settle_waits_for_challenge_period() {
    let f = setup();
    let block = open(&f).await;

    f.contract
        .uncooperative_close(&f.sender, f.receiver.address(), block, tokens(20))
        .await
        .unwrap();
    let closed_at = f.chain.block_number().await.unwrap();
    let info = f
        .contract
        .channel_info(f.sender.address(), f.receiver.address(), block)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(u64::from(info.settle_block_number), closed_at + 10);

    // Settle would execute in block closed_at + 9
    f.chain.mine(8);
    let err = f
        .contract
        .settle(&f.sender, f.receiver.address(), block)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Reverted(_)));

    f.chain.mine(1);
    f.contract
        .settle(&f.sender, f.receiver.address(), block)
        .await
        .unwrap();

    assert_eq!(
        f.chain.token_balance(f.receiver.address()).await.unwrap(),
        tokens(20)
    );
    assert_eq!(
        f.chain.token_balance(f.sender.address()).await.unwrap(),
        tokens(80)
    );
    assert!(f
        .contract
        .channel_info(f.sender.address(), f.receiver.address(), block)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_cooperative_close_requires_receiver_signature() {
    let f = setup();
    let block = open(&f).await;
    let contract_address = f.contract.contract_address();
    let balance = tokens(15);

    let proof = f
        .sender
        .sign_balance_proof(f.receiver.address(), block, balance, contract_address)
        .unwrap();
    let forged = LocalSigner::random()
        .sign_close(f.sender.address(), block, balance, contract_address)
        .unwrap();
    let err = f
        .contract
        .cooperative_close(&f.receiver, f.receiver.address(), block, balance, proof, forged)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Reverted(_)));

    let closing = f
        .receiver
        .sign_close(f.sender.address(), block, balance, contract_address)
        .unwrap();
    f.contract
        .cooperative_close(&f.receiver, f.receiver.address(), block, balance, proof, closing)
        .await
        .unwrap();
    assert_eq!(
        f.chain.token_balance(f.receiver.address()).await.unwrap(),
        balance
    );
}

#[tokio::test]
async fn test_withdraw_then_settle_pays_only_remainder() {
    let f = setup();
    let block = open(&f).await;
    let contract_address = f.contract.contract_address();

    let proof = f
        .sender
        .sign_balance_proof(f.receiver.address(), block, tokens(10), contract_address)
        .unwrap();
    f.contract
        .withdraw(&f.receiver, block, tokens(10), proof)
        .await
        .unwrap();

    // Same balance again has nothing left to withdraw
    let err = f
        .contract
        .withdraw(&f.receiver, block, tokens(10), proof)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Reverted(_)));

    let proof = f
        .sender
        .sign_balance_proof(f.receiver.address(), block, tokens(30), contract_address)
        .unwrap();
    let closing = f
        .receiver
        .sign_close(f.sender.address(), block, tokens(30), contract_address)
        .unwrap();
    f.contract
        .cooperative_close(&f.sender, f.receiver.address(), block, tokens(30), proof, closing)
        .await
        .unwrap();

    let head = f.chain.block_number().await.unwrap();
    let settled = f
        .chain
        .query_logs(
            EventKind::ChannelSettled,
            0,
            head,
            &LogFilter::receiver(f.receiver.address()),
        )
        .await
        .unwrap();
    match &settled[0].event {
        ChannelEvent::Settled {
            balance,
            receiver_tokens,
            ..
        } => {
            assert_eq!(*balance, tokens(30));
            assert_eq!(*receiver_tokens, tokens(20));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        f.chain.token_balance(f.receiver.address()).await.unwrap(),
        tokens(30)
    );
    assert_eq!(
        f.chain.token_balance(f.sender.address()).await.unwrap(),
        tokens(70)
    );
}

#[tokio::test]
async fn test_transaction_without_gas_money_is_rejected() {
    let f = setup();
    let broke = LocalSigner::random();
    f.chain.mint_tokens(broke.address(), tokens(10));

    let err = f
        .contract
        .create_channel_erc223(&broke, f.receiver.address(), tokens(10))
        .await
        .unwrap_err();
    assert!(err.is_insufficient_funds());
}

#[tokio::test]
async fn test_reorg_drops_channel() {
    let f = setup();
    let block = open(&f).await;
    f.chain.reorg(1);

    assert!(f
        .contract
        .channel_info(f.sender.address(), f.receiver.address(), block)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        f.chain.token_balance(f.sender.address()).await.unwrap(),
        tokens(100)
    );
}
