//! The keeper loop: relay the pool price to the market and crank it.
//!
//! One iteration fetches the pool price, pushes it when it moved past the
//! threshold (or has not been pushed for a while), then cranks. Cranks are
//! permissionless and fail routinely when another keeper got there first, so
//! a failed crank is logged and never counted as an error. Nothing is retried
//! inside an iteration; the next iteration is the retry.

use crate::constants::{BPS_DENOM, CU_CRANK, CU_PUSH_PRICE};
use crate::error::KeeperError;
use crate::ix;
use crate::price::{self, AccountSource};
use crate::state;
use crate::units;
use async_trait::async_trait;
use core::fmt;
use solana_program::{instruction::Instruction as SolInstruction, pubkey::Pubkey};
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PRICE_THRESHOLD_BPS: u64 = 10;
pub const DEFAULT_FORCE_PUSH_EVERY: u64 = 60;
pub const DEFAULT_REPORT_EVERY: u64 = 60;

/// Submits one program instruction per transaction.
#[async_trait]
pub trait InstructionSink: Send + Sync {
    async fn submit(
        &self,
        instruction: SolInstruction,
        compute_units: u32,
    ) -> Result<Signature, KeeperError>;
}

#[async_trait]
impl<T: InstructionSink + ?Sized> InstructionSink for Arc<T> {
    async fn submit(
        &self,
        instruction: SolInstruction,
        compute_units: u32,
    ) -> Result<Signature, KeeperError> {
        (**self).submit(instruction, compute_units).await
    }
}

#[derive(Clone, Debug)]
pub struct KeeperConfig {
    pub program_id: Pubkey,
    pub slab: Pubkey,
    /// Oracle account passed to the crank. Authority-priced markets use the slab.
    pub oracle: Pubkey,
    /// Signs both cranks and price pushes; must be the market's oracle authority.
    pub authority: Pubkey,
    pub pool: Option<Pubkey>,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub collateral_decimals: u8,
    pub interval: Duration,
    pub price_threshold_bps: u64,
    pub force_push_every: u64,
    pub report_every: u64,
}

impl KeeperConfig {
    pub fn new(program_id: Pubkey, slab: Pubkey, authority: Pubkey) -> Self {
        KeeperConfig {
            program_id,
            slab,
            oracle: slab,
            authority,
            pool: None,
            base_decimals: 6,
            quote_decimals: 9,
            collateral_decimals: 6,
            interval: DEFAULT_INTERVAL,
            price_threshold_bps: DEFAULT_PRICE_THRESHOLD_BPS,
            force_push_every: DEFAULT_FORCE_PUSH_EVERY,
            report_every: DEFAULT_REPORT_EVERY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FetchingPrice,
    MaybePushingPrice,
    Cranking,
    Sleeping,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct KeeperState {
    pub started_at: Instant,
    pub last_crank: Option<Instant>,
    pub last_push: Option<Instant>,
    pub cranks: u64,
    pub price_updates: u64,
    pub errors: u64,
    pub start_insurance: Option<u128>,
    pub iterations: u64,
    pub iterations_since_push: u64,
    pub last_pushed_price_e6: Option<u128>,
    pub phase: Phase,
}

impl KeeperState {
    fn new() -> Self {
        KeeperState {
            started_at: Instant::now(),
            last_crank: None,
            last_push: None,
            cranks: 0,
            price_updates: 0,
            errors: 0,
            start_insurance: None,
            iterations: 0,
            iterations_since_push: 0,
            last_pushed_price_e6: None,
            phase: Phase::Idle,
        }
    }
}

/// Read-only copy of the loop's counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeeperSnapshot {
    pub uptime: Duration,
    pub cranks: u64,
    pub price_updates: u64,
    pub errors: u64,
    pub iterations: u64,
    pub iterations_since_push: u64,
    pub last_pushed_price_e6: Option<u128>,
    pub start_insurance: Option<u128>,
    pub since_last_crank: Option<Duration>,
    pub since_last_push: Option<Duration>,
    pub phase: Phase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsuranceStatus {
    pub current: u128,
    /// Growth since start. Positive means tokens were burned into the fund.
    pub burned: i128,
    pub burn_per_hour: i128,
}

impl InsuranceStatus {
    pub fn new(start: u128, current: u128, uptime: Duration) -> Self {
        let burned = wide(current).saturating_sub(wide(start));
        let secs = uptime.as_secs() as i128;
        let burn_per_hour = if secs == 0 { 0 } else { burned.saturating_mul(3600) / secs };
        InsuranceStatus {
            current,
            burned,
            burn_per_hour,
        }
    }
}

fn wide(v: u128) -> i128 {
    i128::try_from(v).unwrap_or(i128::MAX)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub uptime: Duration,
    pub cranks: u64,
    pub price_updates: u64,
    pub errors: u64,
    /// `None` when the slab could not be read for this report.
    pub insurance: Option<InsuranceStatus>,
    pub decimals: u8,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime {} | cranks {} | price updates {} | errors {}",
            units::format_duration(self.uptime),
            self.cranks,
            self.price_updates,
            self.errors
        )?;
        if let Some(ins) = &self.insurance {
            write!(
                f,
                " | insurance {} | burned {} ({}/h)",
                units::format_amount(ins.current, self.decimals),
                units::format_signed(ins.burned, self.decimals),
                units::format_signed(ins.burn_per_hour, self.decimals)
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub price_e6: Option<u128>,
    pub pushed: bool,
    pub cranked: bool,
    pub report: Option<StatusReport>,
}

/// Push when nothing was pushed yet, when the move exceeds `threshold_bps` of
/// the last pushed price, or when `force_every` iterations passed without one.
pub fn should_push(
    last_e6: Option<u128>,
    new_e6: u128,
    iterations_since_push: u64,
    threshold_bps: u64,
    force_every: u64,
) -> bool {
    if new_e6 == 0 {
        return false;
    }
    let Some(last) = last_e6 else {
        return true;
    };
    if force_every > 0 && iterations_since_push >= force_every {
        return true;
    }
    let moved = new_e6.abs_diff(last).saturating_mul(BPS_DENOM);
    moved > last.saturating_mul(threshold_bps as u128)
}

pub struct Keeper<S, T> {
    source: S,
    sink: T,
    config: KeeperConfig,
    state: KeeperState,
}

impl<S: AccountSource, T: InstructionSink> Keeper<S, T> {
    pub fn new(source: S, sink: T, config: KeeperConfig) -> Self {
        Keeper {
            source,
            sink,
            config,
            state: KeeperState::new(),
        }
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn snapshot(&self) -> KeeperSnapshot {
        let s = &self.state;
        KeeperSnapshot {
            uptime: s.started_at.elapsed(),
            cranks: s.cranks,
            price_updates: s.price_updates,
            errors: s.errors,
            iterations: s.iterations,
            iterations_since_push: s.iterations_since_push,
            last_pushed_price_e6: s.last_pushed_price_e6,
            start_insurance: s.start_insurance,
            since_last_crank: s.last_crank.map(|t| t.elapsed()),
            since_last_push: s.last_push.map(|t| t.elapsed()),
            phase: s.phase,
        }
    }

    /// Records the starting insurance balance. A slab that cannot be read
    /// here means the keeper is pointed at the wrong account.
    pub async fn prime(&mut self) -> Result<state::InsuranceFund, KeeperError> {
        let data = self.source.account_data(&self.config.slab).await?;
        let header = state::parse_header(&data)?;
        let insurance = state::parse_insurance(&data)?;
        self.state.start_insurance = Some(insurance.balance);
        self.state.started_at = Instant::now();
        info!(
            slab = %self.config.slab,
            admin = %header.admin_status(),
            insurance = %units::format_amount(insurance.balance, self.config.collateral_decimals),
            "keeper primed"
        );
        Ok(insurance)
    }

    pub fn should_push(&self, price_e6: u128) -> bool {
        should_push(
            self.state.last_pushed_price_e6,
            price_e6,
            self.state.iterations_since_push,
            self.config.price_threshold_bps,
            self.config.force_push_every,
        )
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        self.state.iterations += 1;
        self.state.iterations_since_push += 1;

        if let Some(pool) = self.config.pool {
            self.state.phase = Phase::FetchingPrice;
            let (base_dec, quote_dec) = (self.config.base_decimals, self.config.quote_decimals);
            match price::fetch_pool_price(&self.source, &pool, base_dec, quote_dec).await {
                Ok(p) => {
                    outcome.price_e6 = Some(p.price_e6);
                    self.state.phase = Phase::MaybePushingPrice;
                    if p.price_e6 == 0 {
                        debug!(pool = %pool, "pool has no liquidity, skipping push");
                    } else if self.should_push(p.price_e6) {
                        outcome.pushed = self.push_price(p.price_e6).await;
                    }
                }
                Err(e) => {
                    self.state.errors += 1;
                    warn!(pool = %pool, error = %e, "price fetch failed");
                }
            }
        }

        self.state.phase = Phase::Cranking;
        outcome.cranked = self.crank().await;

        if self.config.report_every > 0 && self.state.iterations % self.config.report_every == 0 {
            let report = self.report().await;
            info!("{report}");
            outcome.report = Some(report);
        }
        outcome
    }

    async fn push_price(&mut self, price_e6: u128) -> bool {
        let c = &self.config;
        let now = price::unix_now();
        let built = ix::push_oracle_price(&c.program_id, &c.authority, &c.slab, price_e6, now);
        let result = match built {
            Ok(instruction) => self.sink.submit(instruction, CU_PUSH_PRICE).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(sig) => {
                let previous = self.state.last_pushed_price_e6.replace(price_e6);
                self.state.last_push = Some(Instant::now());
                self.state.price_updates += 1;
                self.state.iterations_since_push = 0;
                info!(
                    price = price::price_from_e6(price_e6),
                    price_e6,
                    previous_e6 = ?previous,
                    signature = %sig,
                    "pushed oracle price"
                );
                true
            }
            Err(e) => {
                self.state.errors += 1;
                error!(price_e6, error = %e, "oracle price push failed");
                false
            }
        }
    }

    async fn crank(&mut self) -> bool {
        let c = &self.config;
        let result = match ix::keeper_crank(&c.program_id, &c.authority, &c.slab, &c.oracle) {
            Ok(instruction) => self.sink.submit(instruction, CU_CRANK).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(sig) => {
                self.state.cranks += 1;
                self.state.last_crank = Some(Instant::now());
                debug!(signature = %sig, "crank landed");
                true
            }
            Err(e) => {
                debug!(error = %e, "crank skipped");
                false
            }
        }
    }

    pub async fn report(&self) -> StatusReport {
        let uptime = self.state.started_at.elapsed();
        let insurance = match self.source.account_data(&self.config.slab).await {
            Ok(data) => match state::parse_insurance(&data) {
                Ok(fund) => Some(fund.balance),
                Err(e) => {
                    warn!(error = %e, "could not decode slab for report");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "could not fetch slab for report");
                None
            }
        };
        StatusReport {
            uptime,
            cranks: self.state.cranks,
            price_updates: self.state.price_updates,
            errors: self.state.errors,
            insurance: insurance.map(|current| {
                InsuranceStatus::new(self.state.start_insurance.unwrap_or(current), current, uptime)
            }),
            decimals: self.config.collateral_decimals,
        }
    }

    /// Runs until `cancel` fires, then returns the final report. Cancellation
    /// is seen between iterations and while sleeping, never mid-submit.
    pub async fn run(&mut self, cancel: CancellationToken) -> StatusReport {
        info!(
            slab = %self.config.slab,
            pool = ?self.config.pool,
            interval_ms = self.config.interval.as_millis() as u64,
            threshold = %units::format_bps(self.config.price_threshold_bps),
            "keeper running"
        );
        while !cancel.is_cancelled() {
            self.tick().await;
            self.state.phase = Phase::Sleeping;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        self.state.phase = Phase::Stopped;
        let report = self.report().await;
        info!("final report: {report}");
        report
    }
}
