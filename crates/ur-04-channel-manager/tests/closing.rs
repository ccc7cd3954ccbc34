//! Receiver-initiated closes, pending closes and withdrawals.

mod common;

use common::{ether, setup, setup_without_gas, tokens};
use ur_03_channel_store::ChannelState;
use ur_04_channel_manager::{ChainEventHandler, ErrorCategory, ManagerError};

#[tokio::test]
async fn test_close_channel_settles_on_chain() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(20)).await;

    f.manager.close_channel(f.sender.address(), block).await.unwrap();

    assert_eq!(f.token_balance(&f.receiver).await, tokens(20));
    assert_eq!(f.token_balance(&f.sender).await, tokens(80));
    assert_eq!(f.manager.liquid_balance().await.unwrap(), tokens(20));
    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.state, ChannelState::CloseRequested);
}

#[tokio::test]
async fn test_close_without_payment() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;

    let err = f.manager.close_channel(f.sender.address(), block).await.unwrap_err();
    assert!(matches!(err, ManagerError::NoBalanceProofReceived { .. }));

    let err = f.manager.close_channel(f.sender.address(), block + 1).await.unwrap_err();
    assert!(matches!(err, ManagerError::NoOpenChannel { .. }));
}

#[tokio::test]
async fn test_close_without_gas_is_parked_then_retried() {
    let f = setup_without_gas().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(15)).await;

    let err = f.manager.close_channel(f.sender.address(), block).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::FundsExhaustion);
    let pending = f.manager.pending_channels().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].state, ChannelState::ClosePending);

    // Still no gas: the sweep logs and keeps it pending
    assert!(f.manager.close_pending_channels().await.unwrap().is_empty());
    assert_eq!(f.manager.pending_channels().await.unwrap().len(), 1);

    f.chain.fund_ether(f.receiver.address(), ether());
    assert_eq!(f.manager.eth_balance().await.unwrap(), ether());
    let sent = f.manager.close_pending_channels().await.unwrap();
    assert_eq!(sent.len(), 1);
    assert!(f.manager.pending_channels().await.unwrap().is_empty());
    assert_eq!(f.token_balance(&f.receiver).await, tokens(15));
}

#[tokio::test]
async fn test_close_while_offline_is_parked() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(5)).await;

    f.chain.set_offline(true);
    let err = f.manager.close_channel(f.sender.address(), block).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::BlockchainLiveness);
    assert_eq!(f.manager.pending_channels().await.unwrap().len(), 1);

    f.chain.set_offline(false);
    assert_eq!(f.manager.close_pending_channels().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_force_close_without_proof_marks_closed() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;

    f.manager.force_close_channel(f.sender.address(), block).await.unwrap();

    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.state, ChannelState::Closed);
    let err = f.manager.close_channel(f.sender.address(), block).await.unwrap_err();
    assert!(matches!(err, ManagerError::NoOpenChannel { .. }));
}

#[tokio::test]
async fn test_force_close_of_vanished_channel_marks_closed() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(5)).await;

    // Settled behind our back: the cooperative close reverts
    let closing = f
        .receiver
        .sign_close(f.sender.address(), block, tokens(5), f.manager.contract_address())
        .unwrap();
    f.contract
        .cooperative_close(
            &f.sender,
            f.receiver.address(),
            block,
            tokens(5),
            f.proof(block, tokens(5)),
            closing,
        )
        .await
        .unwrap();

    f.manager.force_close_channel(f.sender.address(), block).await.unwrap();
    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.state, ChannelState::Closed);
}

#[tokio::test]
async fn test_closed_channel_ignores_later_events() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.manager.force_close_channel(f.sender.address(), block).await.unwrap();
    let closed = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(closed.state, ChannelState::Closed);

    // The contract still pays out on a proof we never registered
    f.contract
        .withdraw(&f.receiver, block, tokens(12), f.proof(block, tokens(12)))
        .await
        .unwrap();

    f.manager
        .event_channel_close_requested(f.sender.address(), block, tokens(0), 999)
        .await
        .unwrap();
    f.manager
        .event_channel_withdraw(f.sender.address(), block, tokens(12))
        .await
        .unwrap();

    let after = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(after, closed);
    assert_eq!(after.settle_timeout, None);
    assert_eq!(after.withdrawn_balance, tokens(0));
}

#[tokio::test]
async fn test_withdraw_keeps_channel_open() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(30)).await;

    f.manager
        .withdraw(block, tokens(30), f.proof(block, tokens(30)))
        .await
        .unwrap();
    assert_eq!(f.token_balance(&f.receiver).await, tokens(30));

    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert!(channel.is_open());
    assert_eq!(channel.withdrawn_balance, tokens(30));
    assert_eq!(f.manager.locked_balance().await.unwrap(), tokens(0));

    let err = f
        .manager
        .withdraw(block, tokens(30), f.proof(block, tokens(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidBalanceAmount(_)));

    // Payments continue; the close pays only the remainder
    f.pay(block, tokens(35)).await;
    f.manager.close_channel(f.sender.address(), block).await.unwrap();
    assert_eq!(f.token_balance(&f.receiver).await, tokens(35));
    assert_eq!(f.token_balance(&f.sender).await, tokens(65));
}

#[tokio::test]
async fn test_withdraw_requires_registered_balance() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(10)).await;

    let err = f
        .manager
        .withdraw(block, tokens(20), f.proof(block, tokens(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidBalanceAmount(_)));
    assert_eq!(f.token_balance(&f.receiver).await, tokens(0));
}

#[tokio::test]
async fn test_withdraw_event_reconciles_total() {
    let f = setup().await;
    let block = f.open_channel(tokens(50)).await;
    f.pay(block, tokens(12)).await;
    f.manager
        .withdraw(block, tokens(12), f.proof(block, tokens(12)))
        .await
        .unwrap();

    // Replayed delta does not double count
    for _ in 0..2 {
        f.manager
            .event_channel_withdraw(f.sender.address(), block, tokens(12))
            .await
            .unwrap();
    }
    let channel = f.manager.get_channel(f.sender.address(), block).await.unwrap().unwrap();
    assert_eq!(channel.withdrawn_balance, tokens(12));
}

#[tokio::test]
async fn test_withdraw_all_respects_minimum() {
    let f = setup().await;
    let small = f.open_channel(tokens(20)).await;
    f.chain.mine(1);
    let large = f.open_channel(tokens(20)).await;
    f.pay(small, tokens(2)).await;
    f.pay(large, tokens(9)).await;

    let sent = f.manager.withdraw_all(tokens(5)).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(f.token_balance(&f.receiver).await, tokens(9));
    assert_eq!(f.manager.locked_balance().await.unwrap(), tokens(2));

    let sent = f.manager.withdraw_all(tokens(0)).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(f.manager.locked_balance().await.unwrap(), tokens(0));
}
