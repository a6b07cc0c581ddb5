//! Keeper daemon: relays the pool price into the market and cranks it until
//! interrupted.

use anyhow::{Context, Result};
use percolator_keeper::{
    config::{self, DeploymentRecord, Settings},
    keeper::Keeper,
    rpc::RpcTransport,
};
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "percolator_keeper=info,keeper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("Failed to load settings")?;
    let deployment = DeploymentRecord::from_env().context("Failed to load deployment record")?;
    let wallet = config::load_keypair_from_env().context("Failed to read keypair file")?;
    let authority = wallet.pubkey();

    if deployment.oracle_authority != authority {
        warn!(
            wallet = %authority,
            oracle_authority = %deployment.oracle_authority,
            "wallet is not the recorded oracle authority; price pushes will be rejected"
        );
    }

    let keeper_config = settings.keeper_config(&deployment, authority);
    let transport = Arc::new(
        RpcTransport::new(settings.rpc_url.clone(), wallet)
            .with_max_retries(settings.keeper.max_retries as usize),
    );
    let mut keeper = Keeper::new(transport.clone(), transport, keeper_config);
    keeper.prime().await.context("Failed to read slab at startup")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping after the current iteration");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "could not install Ctrl+C handler"),
        }
    });

    keeper.run(cancel).await;
    Ok(())
}
