//! JSON settings, the deployment record and the wallet file.
//!
//! Both JSON files use camelCase keys so they stay interchangeable with the
//! files the deployment scripts already write.

use crate::constants::MAX_ACCOUNTS;
use crate::error::KeeperError;
use crate::keeper::{self, KeeperConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solana_program::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./config/mainnet.json";
pub const DEFAULT_WALLET_PATH: &str = "~/.config/solana/id.json";
pub const DEFAULT_DEPLOYMENT_PATH: &str = "./deployment.json";

/// Base58 string form of a pubkey.
mod pubkey_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use solana_program::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(d)?;
        Pubkey::from_str(&raw).map_err(|e| de::Error::custom(format!("{raw}: {e}")))
    }
}

mod opt_pubkey_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use solana_program::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Option<Pubkey>, s: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(k) => s.collect_str(k),
            None => s.serialize_none(),
        }
    }

    /// Empty strings count as absent.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Pubkey>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => Pubkey::from_str(&raw)
                .map(Some)
                .map_err(|e| de::Error::custom(format!("{raw}: {e}"))),
        }
    }
}

/// Token amounts are written as decimal strings to survive JSON number
/// precision; plain numbers are accepted too.
mod amount_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Number(n) => Ok(n as u128),
            Raw::Text(t) => t
                .trim()
                .parse::<u128>()
                .map_err(|e| de::Error::custom(format!("amount {t:?}: {e}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub network: String,
    pub rpc_url: String,
    pub memecoin: MemecoinSettings,
    pub oracle: OracleSettings,
    pub programs: ProgramSettings,
    pub market: MarketSettings,
    #[serde(default)]
    pub keeper: KeeperSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemecoinSettings {
    #[serde(with = "pubkey_str")]
    pub mint: Pubkey,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    Switchboard,
    Pumpswap,
    Authority,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleSettings {
    #[serde(rename = "type")]
    pub kind: OracleKind,
    #[serde(default, with = "opt_pubkey_str", skip_serializing_if = "Option::is_none")]
    pub feed_address: Option<Pubkey>,
    #[serde(with = "pubkey_str")]
    pub pool_address: Pubkey,
    pub max_staleness_seconds: u64,
    pub confidence_filter_bps: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSettings {
    #[serde(with = "pubkey_str")]
    pub percolator: Pubkey,
    #[serde(with = "pubkey_str")]
    pub matcher: Pubkey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSettings {
    #[serde(default, with = "opt_pubkey_str", skip_serializing_if = "Option::is_none")]
    pub slab_address: Option<Pubkey>,
    #[serde(default, with = "opt_pubkey_str", skip_serializing_if = "Option::is_none")]
    pub vault_address: Option<Pubkey>,
    #[serde(with = "amount_str")]
    pub initial_lp_collateral: u128,
    #[serde(with = "amount_str")]
    pub initial_insurance: u128,
    pub trading_fee_bps: u64,
    pub maintenance_margin_bps: u64,
    pub initial_margin_bps: u64,
    pub liquidation_fee_bps: u64,
    pub liquidation_buffer_bps: u64,
    pub max_accounts: u64,
    #[serde(with = "amount_str")]
    pub new_account_fee: u128,
    pub inverted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeeperSettings {
    pub interval_ms: u64,
    /// Rebroadcasts the RPC node makes per transaction. The loop itself never
    /// resends; the next iteration does.
    pub max_retries: u32,
    pub price_threshold_bps: u64,
    pub force_push_every: u64,
    pub report_every: u64,
    pub quote_decimals: u8,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        KeeperSettings {
            interval_ms: keeper::DEFAULT_INTERVAL.as_millis() as u64,
            max_retries: 3,
            price_threshold_bps: keeper::DEFAULT_PRICE_THRESHOLD_BPS,
            force_push_every: keeper::DEFAULT_FORCE_PUSH_EVERY,
            report_every: keeper::DEFAULT_REPORT_EVERY,
            quote_decimals: 9,
        }
    }
}

fn check(ok: bool, what: impl FnOnce() -> String) -> Result<(), KeeperError> {
    if ok {
        Ok(())
    } else {
        Err(KeeperError::Config(what()))
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeeperError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KeeperError::Config(format!("config file {}: {e}", path.display())))?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// `CONFIG_PATH`, falling back to `./config/mainnet.json`.
    pub fn from_env() -> Result<Self, KeeperError> {
        Self::load(env_path("CONFIG_PATH", DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<(), KeeperError> {
        let m = &self.market;
        let k = &self.keeper;
        check(!self.rpc_url.is_empty(), || "rpcUrl is empty".into())?;
        check(self.memecoin.decimals <= 18, || {
            format!("memecoin.decimals {} exceeds 18", self.memecoin.decimals)
        })?;
        for (name, bps) in [
            ("tradingFeeBps", m.trading_fee_bps),
            ("maintenanceMarginBps", m.maintenance_margin_bps),
            ("initialMarginBps", m.initial_margin_bps),
            ("liquidationFeeBps", m.liquidation_fee_bps),
            ("liquidationBufferBps", m.liquidation_buffer_bps),
        ] {
            check(bps <= 10_000, || format!("market.{name} {bps} exceeds 10000"))?;
        }
        check(m.maintenance_margin_bps <= m.initial_margin_bps, || {
            format!(
                "maintenance margin {} is above initial margin {}",
                m.maintenance_margin_bps, m.initial_margin_bps
            )
        })?;
        check(m.max_accounts > 0 && m.max_accounts <= MAX_ACCOUNTS as u64, || {
            format!("market.maxAccounts {} outside 1..={MAX_ACCOUNTS}", m.max_accounts)
        })?;
        check(self.oracle.confidence_filter_bps <= u16::MAX as u32, || {
            format!(
                "oracle.confidenceFilterBps {} does not fit in u16",
                self.oracle.confidence_filter_bps
            )
        })?;
        let feed_ok =
            self.oracle.kind != OracleKind::Switchboard || self.oracle.feed_address.is_some();
        check(feed_ok, || "switchboard oracle needs oracle.feedAddress".into())?;
        check(k.interval_ms > 0, || "keeper.intervalMs must be positive".into())?;
        check(k.force_push_every > 0, || "keeper.forcePushEvery must be positive".into())?;
        check(k.report_every > 0, || "keeper.reportEvery must be positive".into())?;
        check(k.quote_decimals <= 18, || {
            format!("keeper.quoteDecimals {} exceeds 18", k.quote_decimals)
        })?;
        Ok(())
    }

    /// Keeper parameters for `deployment`, signed by `authority`. Feed-priced
    /// markets are cranked against the feed and get no price relay.
    pub fn keeper_config(&self, deployment: &DeploymentRecord, authority: Pubkey) -> KeeperConfig {
        let mut cfg = KeeperConfig::new(deployment.program_id, deployment.slab, authority);
        match (self.oracle.kind, self.oracle.feed_address) {
            (OracleKind::Switchboard, Some(feed)) => cfg.oracle = feed,
            _ => cfg.pool = Some(self.oracle.pool_address),
        }
        cfg.base_decimals = self.memecoin.decimals;
        cfg.collateral_decimals = self.memecoin.decimals;
        cfg.quote_decimals = self.keeper.quote_decimals;
        cfg.interval = Duration::from_millis(self.keeper.interval_ms);
        cfg.price_threshold_bps = self.keeper.price_threshold_bps;
        cfg.force_push_every = self.keeper.force_push_every;
        cfg.report_every = self.keeper.report_every;
        cfg
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LpRecord {
    pub index: u16,
    #[serde(with = "pubkey_str")]
    pub pda: Pubkey,
    #[serde(with = "pubkey_str")]
    pub matcher_context: Pubkey,
}

/// What a deployment left behind. Keys this crate does not know about are
/// kept and written back unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub network: String,
    pub deployed_at: String,
    #[serde(with = "pubkey_str")]
    pub program_id: Pubkey,
    #[serde(with = "pubkey_str")]
    pub matcher_program_id: Pubkey,
    #[serde(with = "pubkey_str")]
    pub slab: Pubkey,
    #[serde(with = "pubkey_str")]
    pub mint: Pubkey,
    #[serde(with = "pubkey_str")]
    pub vault: Pubkey,
    #[serde(with = "pubkey_str")]
    pub vault_pda: Pubkey,
    pub lp: LpRecord,
    #[serde(with = "pubkey_str")]
    pub oracle_authority: Pubkey,
    #[serde(with = "pubkey_str")]
    pub admin: Pubkey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_renounced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renounced_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeploymentRecord {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeeperError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KeeperError::Config(format!(
                "deployment record {}: {e} (run init-market first)",
                path.display()
            ))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads from [`deployment_path`].
    pub fn from_env() -> Result<Self, KeeperError> {
        Self::load(deployment_path())
    }

    /// Writes through a temp file in the same directory, then renames over
    /// `path`, so readers never see a half-written record.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeeperError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| KeeperError::Io(e.error))?;
        Ok(())
    }

    pub fn mark_renounced(&mut self, at: impl Into<String>) {
        self.admin = Pubkey::default();
        self.oracle_authority = Pubkey::default();
        self.admin_renounced = Some(true);
        self.renounced_at = Some(at.into());
    }
}

/// `DEPLOYMENT_PATH`, falling back to `./deployment.json`.
pub fn deployment_path() -> PathBuf {
    env_path("DEPLOYMENT_PATH", DEFAULT_DEPLOYMENT_PATH)
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

/// Leading `~` expands to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(format!("{home}{rest}")),
        _ => PathBuf::from(path),
    }
}

pub fn load_keypair(path: impl AsRef<Path>) -> Result<Keypair, KeeperError> {
    let path = path.as_ref();
    solana_sdk::signature::read_keypair_file(path)
        .map_err(|e| KeeperError::Config(format!("wallet {}: {e}", path.display())))
}

/// `WALLET_PATH`, falling back to the Solana CLI default keypair.
pub fn load_keypair_from_env() -> Result<Keypair, KeeperError> {
    let raw = std::env::var("WALLET_PATH").unwrap_or_else(|_| DEFAULT_WALLET_PATH.to_string());
    load_keypair(expand_home(&raw))
}
