//! One-shot, read-only market report.

use anyhow::{bail, Context, Result};
use percolator_keeper::{
    config::{self, DeploymentRecord, Settings},
    price::{self, AccountSource},
    rpc::RpcTransport,
    state::{AdminStatus, SlabAccount},
    units::{format_amount, format_bps},
};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "percolator_keeper=info,market_status=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("Failed to load settings")?;
    let deployment = DeploymentRecord::from_env().context("Failed to load deployment record")?;
    // Reads only, but the transport still wants a payer.
    let wallet = config::load_keypair_from_env().context("Failed to read keypair file")?;
    let rpc = RpcTransport::new(settings.rpc_url.clone(), wallet);

    let data = rpc
        .account_data(&deployment.slab)
        .await
        .with_context(|| format!("Market {} not found", deployment.slab))?;
    let slab = SlabAccount::decode(&data).context("Failed to decode slab")?;
    if slab.header.is_resolved() {
        warn!("market is resolved");
    }

    let decimals = settings.memecoin.decimals;
    let symbol = &settings.memecoin.symbol;
    let summary = slab.summary();
    let rule = "=".repeat(60);

    println!("{rule}");
    println!("  {} ({symbol}) perpetuals market", settings.memecoin.name);
    println!("{rule}");

    println!("\nADMIN");
    match summary.admin {
        AdminStatus::Renounced => println!("  renounced, market is immutable"),
        AdminStatus::Active(admin) => println!("  {admin} (not renounced)"),
    }
    if slab.header.oracle_authority_enabled() {
        println!("  oracle authority: {}", slab.header.oracle_authority);
    }

    println!("\nVAULT");
    match rpc.account_data(&deployment.vault).await.and_then(|d| price::token_amount("vault", &d)) {
        Ok(amount) => {
            println!("  balance:       {} {symbol}", format_amount(amount as u128, decimals))
        }
        Err(e) => println!("  could not fetch vault balance: {e}"),
    }

    println!("\nINSURANCE FUND");
    println!("  locked:        {} {symbol}", format_amount(summary.insurance.balance, decimals));
    println!(
        "  from fees:     {} {symbol}",
        format_amount(summary.insurance.fee_revenue, decimals)
    );

    let p = &slab.engine.params;
    println!("\nPARAMETERS");
    println!("  trading fee:   {}", format_bps(p.trading_fee_bps));
    println!("  maint. margin: {}", format_bps(p.maintenance_margin_bps));
    println!("  init. margin:  {}", format_bps(p.initial_margin_bps));
    println!("  liq. fee:      {}", format_bps(p.liquidation_fee_bps));
    println!(
        "  last crank:    slot {} (current {})",
        slab.engine.last_crank_slot, slab.engine.current_slot
    );

    println!("\nACCOUNTS");
    println!("  used:          {} / {}", summary.used_accounts, slab.layout.max_accounts());
    println!("  LPs:           {}", summary.lp_count);
    println!("  users:         {}", summary.user_count);
    println!("  open interest: {} {symbol}", format_amount(summary.open_interest, decimals));

    println!("\nPUMPSWAP PRICE");
    let pool = settings.oracle.pool_address;
    match price::fetch_pool_price(&rpc, &pool, decimals, settings.keeper.quote_decimals).await {
        Ok(pp) => {
            println!("  price:         {:.9} SOL/{symbol}", pp.price);
            println!("  {symbol} liquidity: {}", format_amount(pp.base_reserve as u128, decimals));
            println!(
                "  SOL liquidity: {}",
                format_amount(pp.quote_reserve as u128, settings.keeper.quote_decimals)
            );
        }
        Err(e) => println!("  could not fetch: {e}"),
    }

    println!("\nADDRESSES");
    println!("  slab:          {}", deployment.slab);
    println!("  vault:         {}", deployment.vault);
    println!("  mint:          {}", deployment.mint);
    println!("  program:       {}", deployment.program_id);

    if slab.config.collateral_mint != deployment.mint {
        bail!(
            "slab collateral mint {} does not match deployment mint {}",
            slab.config.collateral_mint,
            deployment.mint
        );
    }
    Ok(())
}
