//! Manager state survives a restart from its state file.

use primitive_types::U256;
use std::sync::Arc;
use ur_01_crypto_protocol::LocalSigner;
use ur_02_onchain_gateway::SimulatedChain;
use ur_03_channel_store::{ChannelState, LockError, StoreError};
use ur_04_channel_manager::{ChainEventHandler, ChannelManager, ErrorCategory, ManagerConfig, ManagerError};

#[tokio::test]
async fn test_restart_restores_channels_and_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ManagerConfig::for_testing();
    config.state_path = Some(dir.path().join("receiver.db"));
    let chain = Arc::new(SimulatedChain::new(config.network.clone()));
    let receiver = LocalSigner::random();
    let sender = LocalSigner::random();

    let proof = sender
        .sign_balance_proof(receiver.address(), 4, U256::from(7u64), config.network.contract_address)
        .unwrap();
    {
        let manager = ChannelManager::new(chain.clone(), receiver.clone(), config.clone())
            .await
            .unwrap();
        manager
            .event_channel_opened(sender.address(), 4, U256::from(10u64))
            .await
            .unwrap();
        manager
            .register_payment(sender.address(), 4, U256::from(7u64), proof)
            .await
            .unwrap();
        manager
            .set_head(12, Default::default(), 10, Default::default())
            .await
            .unwrap();

        // The state file is exclusive while the manager lives
        let err = ChannelManager::new(chain.clone(), receiver.clone(), config.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Store(StoreError::Lock(LockError::AlreadyLocked { .. }))
        ));
        assert_eq!(err.category(), ErrorCategory::Durability);
    }

    let manager = ChannelManager::new(chain, receiver, config).await.unwrap();
    let channel = manager.get_channel(sender.address(), 4).await.unwrap().unwrap();
    assert_eq!(channel.balance, U256::from(7u64));
    assert_eq!(channel.last_signature, Some(proof));
    assert_eq!(channel.state, ChannelState::Open);

    let sync = manager.sync_state().await.unwrap();
    assert_eq!(sync.unconfirmed_head_number, Some(12));
    assert_eq!(sync.confirmed_head_number, Some(10));
}

#[tokio::test]
async fn test_state_file_of_another_receiver_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ManagerConfig::for_testing();
    config.state_path = Some(dir.path().join("receiver.db"));
    let chain = Arc::new(SimulatedChain::new(config.network.clone()));

    drop(
        ChannelManager::new(chain.clone(), LocalSigner::random(), config.clone())
            .await
            .unwrap(),
    );
    let err = ChannelManager::new(chain, LocalSigner::random(), config)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Store(StoreError::IdentityMismatch { .. })));
}
