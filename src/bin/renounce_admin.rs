//! Disables the oracle authority and hands admin to the zero address. There is
//! no way back, so nothing is sent unless `RENOUNCE_CONFIRM=RENOUNCE` is set.

use anyhow::{bail, Context, Result};
use percolator_keeper::{
    config::{self, DeploymentRecord, Settings},
    constants::CU_ADMIN,
    ix,
    price::AccountSource,
    rpc::RpcTransport,
    state::{self, AdminStatus},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIRM_VAR: &str = "RENOUNCE_CONFIRM";
const CONFIRM_PHRASE: &str = "RENOUNCE";

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "percolator_keeper=info,renounce_admin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn renounced_at() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("Failed to load settings")?;
    let record_path = config::deployment_path();
    let mut deployment =
        DeploymentRecord::load(&record_path).context("Failed to load deployment record")?;
    let wallet = config::load_keypair_from_env().context("Failed to read keypair file")?;
    let rpc = RpcTransport::new(settings.rpc_url.clone(), wallet).with_preflight();
    let admin = rpc.payer();

    let data = rpc
        .account_data(&deployment.slab)
        .await
        .with_context(|| format!("Market {} not found", deployment.slab))?;
    let header = state::parse_header(&data).context("Failed to decode slab header")?;
    match header.admin_status() {
        AdminStatus::Renounced => {
            info!(slab = %deployment.slab, "admin already renounced on chain");
            if deployment.admin_renounced != Some(true) {
                deployment.mark_renounced(renounced_at());
                deployment.save(&record_path).context("Failed to update deployment record")?;
            }
            return Ok(());
        }
        AdminStatus::Active(current) if current != admin => {
            bail!("wallet {admin} is not the market admin {current}");
        }
        AdminStatus::Active(_) => {}
    }

    if std::env::var(CONFIRM_VAR).as_deref() != Ok(CONFIRM_PHRASE) {
        bail!(
            "renouncing admin of {} is irreversible; set {CONFIRM_VAR}={CONFIRM_PHRASE} to proceed",
            deployment.slab
        );
    }

    let steps = ix::renounce_admin(&deployment.program_id, &admin, &deployment.slab)?;
    for (step, instruction) in steps.into_iter().enumerate() {
        let name = ix::Instruction::decode(&instruction.data)?.name();
        let signature = rpc
            .send(&[instruction], CU_ADMIN)
            .await
            .with_context(|| format!("{name} failed after {step} completed steps"))?;
        info!(step = step + 1, instruction = name, %signature, "renounce step landed");
    }

    deployment.mark_renounced(renounced_at());
    deployment.save(&record_path).context("Failed to update deployment record")?;
    info!(
        slab = %deployment.slab,
        record = %record_path.display(),
        "admin renounced, market is immutable"
    );
    Ok(())
}
