//! Moves collateral from the wallet's token account into the insurance fund.
//! Once admin is renounced nothing can take it back out.
//!
//! `INSURANCE_AMOUNT` (base units) overrides `market.initialInsurance`.

use anyhow::{bail, Context, Result};
use percolator_keeper::{
    config::{self, DeploymentRecord, Settings},
    constants::CU_DEPOSIT,
    ix::Instruction,
    price::{self, AccountSource},
    rpc::RpcTransport,
    state,
    units::format_amount,
};
use spl_associated_token_account::get_associated_token_address;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "percolator_keeper=info,fund_insurance=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn amount_from_env(default: u128) -> Result<u128> {
    match std::env::var("INSURANCE_AMOUNT") {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("INSURANCE_AMOUNT {raw:?} is not a base-unit amount")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("Failed to load settings")?;
    let deployment = DeploymentRecord::from_env().context("Failed to load deployment record")?;
    let wallet = config::load_keypair_from_env().context("Failed to read keypair file")?;
    let rpc = RpcTransport::new(settings.rpc_url.clone(), wallet).with_preflight();
    let payer = rpc.payer();

    let decimals = settings.memecoin.decimals;
    let symbol = &settings.memecoin.symbol;
    let amount = amount_from_env(settings.market.initial_insurance)?;
    if amount == 0 {
        bail!("insurance amount is zero");
    }

    let payer_ata = get_associated_token_address(&payer, &deployment.mint);
    let balance = rpc
        .account_data(&payer_ata)
        .await
        .and_then(|data| price::token_amount("wallet token", &data))
        .with_context(|| format!("Failed to read {symbol} balance of {payer_ata}"))?;
    if amount > balance as u128 {
        bail!(
            "insufficient balance: have {} {symbol}, need {}",
            format_amount(balance as u128, decimals),
            format_amount(amount, decimals)
        );
    }

    let instruction = Instruction::TopUpInsurance { amount }.build(
        &deployment.program_id,
        &[payer, deployment.slab, payer_ata, deployment.vault, spl_token::id()],
    )?;
    let signature = rpc
        .send(&[instruction], CU_DEPOSIT)
        .await
        .context("TopUpInsurance failed")?;
    info!(amount = %format_amount(amount, decimals), %signature, "insurance fund topped up");

    let data = rpc.account_data(&deployment.slab).await?;
    let insurance = state::parse_insurance(&data)?;
    println!(
        "Insurance fund now holds {} {symbol}",
        format_amount(insurance.balance, decimals)
    );
    Ok(())
}
