//! # uRaiden Receiver
//!
//! Runs the receiver side of the channel network: keeps the channel
//! manager's state in step with the settlement contract until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from `UR_*` environment variables
//! 2. Open the state file (exclusive lock, receiver / contract identity)
//! 3. Spawn the sync loop and wait for the first full sync
//! 4. Retry parked channel closes
//! 5. Run until Ctrl+C or a fatal sync error

use std::sync::Arc;

use anyhow::{Context, Result};
use receiver_runtime::{ReceiverRuntime, RuntimeConfig};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ur_01_crypto_protocol::LocalSigner;
use ur_02_onchain_gateway::JsonRpcGateway;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    info!("===========================================");
    info!("  uRaiden Receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("  Chain {} via {}", config.manager.network.chain_id, config.rpc_url);
    info!("===========================================");

    let signer = LocalSigner::from_hex(&config.private_key).context("Invalid UR_PRIVATE_KEY")?;
    let gateway = Arc::new(JsonRpcGateway::new(
        config.rpc_url.clone(),
        config.manager.network.clone(),
    ));

    let mut runtime = ReceiverRuntime::open(gateway, signer, config.manager, config.sync)
        .await
        .context("Failed to open the channel manager")?;
    runtime.start().await.context("Failed to start syncing")?;

    info!("Receiver is running. Press Ctrl+C to stop.");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
        }
        exited = runtime.join() => {
            if let Err(e) = exited {
                error!("Sync loop halted: {}", e);
                return Err(e.into());
            }
        }
    }

    runtime.shutdown().await?;
    Ok(())
}
