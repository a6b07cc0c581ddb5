//! Keeper loop tests
//!
//! The chain and the transaction sink are in-memory mocks. Time is paused, so
//! sleeps resolve instantly and uptime only moves when a test advances it.

use async_trait::async_trait;
use percolator_keeper::{
    constants::{MAGIC, VERSION},
    error::KeeperError,
    ix::Instruction,
    keeper::{InstructionSink, Keeper, KeeperConfig, Phase},
    pool::{PoolAccount, WSOL_MINT},
    price::{self, AccountSource},
    state::{EngineState, InsuranceFund, MarketConfig, SlabAccount, SlabHeader, SlabLayout},
    tags::{TAG_KEEPER_CRANK, TAG_PUSH_ORACLE_PRICE},
};
use solana_program::{
    instruction::Instruction as SolInstruction, program_pack::Pack, pubkey::Pubkey,
};
use solana_sdk::signature::Signature;
use spl_token::state::{Account as TokenAccount, AccountState};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// --- Harness ---

fn pk(n: u8) -> Pubkey {
    Pubkey::new_from_array([n; 32])
}

const PROGRAM: u8 = 200;
const SLAB: u8 = 60;
const POOL: u8 = 50;
const BASE_VAULT: u8 = 51;
const QUOTE_VAULT: u8 = 52;
const KEEPER: u8 = 70;

fn slab_bytes(insurance: u128) -> Vec<u8> {
    SlabAccount {
        layout: SlabLayout::new(64),
        header: SlabHeader {
            magic: MAGIC,
            version: VERSION,
            bump: 254,
            flags: 0,
            admin: pk(1),
            oracle_authority: pk(KEEPER),
            req_nonce: 0,
            last_thr_update_slot: 0,
        },
        config: MarketConfig {
            collateral_mint: pk(3),
            vault: pk(4),
            index_feed_id: [0; 32],
            max_staleness_secs: 60,
            conf_filter_bps: 0,
            vault_authority_bump: 255,
            invert: 0,
            unit_scale: 0,
            authority_price_e6: 0,
            authority_timestamp: 0,
            oracle_price_cap_e2bps: 0,
            last_effective_price_e6: 0,
        },
        engine: EngineState {
            insurance_fund: InsuranceFund {
                balance: insurance,
                fee_revenue: 0,
            },
            ..EngineState::default()
        },
        accounts: Vec::new(),
    }
    .encode()
    .unwrap()
}

fn token_account(mint: Pubkey, amount: u64) -> Vec<u8> {
    let acc = TokenAccount {
        mint,
        owner: pk(POOL),
        amount,
        state: AccountState::Initialized,
        ..TokenAccount::default()
    };
    let mut buf = vec![0u8; TokenAccount::LEN];
    TokenAccount::pack(acc, &mut buf).unwrap();
    buf
}

#[derive(Default)]
struct MockChain {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
}

impl MockChain {
    fn new(base: u64, quote: u64) -> Arc<Self> {
        let chain = Arc::new(MockChain::default());
        let pool = PoolAccount {
            pool_bump: 255,
            index: 0,
            creator: pk(40),
            base_mint: pk(3),
            quote_mint: WSOL_MINT,
            lp_mint: pk(43),
            pool_base_token_account: pk(BASE_VAULT),
            pool_quote_token_account: pk(QUOTE_VAULT),
            lp_supply: 1,
            is_mayhem_mode: Some(false),
        };
        chain.set(pk(POOL), pool.encode());
        chain.set(pk(SLAB), slab_bytes(5_000));
        chain.set_reserves(base, quote);
        chain
    }

    fn set(&self, key: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(key, data);
    }

    fn remove(&self, key: &Pubkey) {
        self.accounts.lock().unwrap().remove(key);
    }

    fn set_reserves(&self, base: u64, quote: u64) {
        self.set(pk(BASE_VAULT), token_account(pk(3), base));
        self.set(pk(QUOTE_VAULT), token_account(WSOL_MINT, quote));
    }
}

#[async_trait]
impl AccountSource for MockChain {
    async fn account_data(&self, key: &Pubkey) -> Result<Vec<u8>, KeeperError> {
        self.accounts
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(KeeperError::AccountNotFound(*key))
    }
}

#[derive(Default)]
struct MockSink {
    sent: Mutex<Vec<(SolInstruction, u32)>>,
    fail_cranks: AtomicBool,
    fail_pushes: AtomicBool,
    cancel_after_cranks: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockSink {
    fn sent_with_tag(&self, tag: u8) -> Vec<(SolInstruction, u32)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(ix, _)| ix.data[0] == tag)
            .cloned()
            .collect()
    }

    fn pushed_prices(&self) -> Vec<u128> {
        self.sent_with_tag(TAG_PUSH_ORACLE_PRICE)
            .iter()
            .map(|(ix, _)| match Instruction::decode(&ix.data).unwrap() {
                Instruction::PushOraclePrice { price_e6, .. } => price_e6,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }
}

#[async_trait]
impl InstructionSink for MockSink {
    async fn submit(
        &self,
        instruction: SolInstruction,
        compute_units: u32,
    ) -> Result<Signature, KeeperError> {
        let tag = instruction.data[0];
        if tag == TAG_KEEPER_CRANK && self.fail_cranks.load(Ordering::SeqCst) {
            return Err(KeeperError::SubmissionFailure("crank rejected".into()));
        }
        if tag == TAG_PUSH_ORACLE_PRICE && self.fail_pushes.load(Ordering::SeqCst) {
            return Err(KeeperError::SubmissionFailure("push rejected".into()));
        }
        self.sent.lock().unwrap().push((instruction, compute_units));

        if tag == TAG_KEEPER_CRANK {
            let cranks = self.sent_with_tag(TAG_KEEPER_CRANK).len();
            if let Some((after, token)) = &*self.cancel_after_cranks.lock().unwrap() {
                if cranks >= *after {
                    token.cancel();
                }
            }
        }
        Ok(Signature::default())
    }
}

fn keeper_config() -> KeeperConfig {
    let mut cfg = KeeperConfig::new(pk(PROGRAM), pk(SLAB), pk(KEEPER));
    cfg.pool = Some(pk(POOL));
    cfg.base_decimals = 9;
    cfg.quote_decimals = 9;
    cfg.interval = Duration::from_millis(500);
    cfg
}

type TestKeeper = Keeper<Arc<MockChain>, Arc<MockSink>>;

// Reserves of 1e12/1e12 price the token at exactly 1.000000.
const ONE: u64 = 1_000_000_000_000;

fn setup(cfg: KeeperConfig) -> (Arc<MockChain>, Arc<MockSink>, TestKeeper) {
    let chain = MockChain::new(ONE, ONE);
    let sink = Arc::new(MockSink::default());
    let keeper = Keeper::new(chain.clone(), sink.clone(), cfg);
    (chain, sink, keeper)
}

// --- Price relay ---

#[tokio::test(start_paused = true)]
async fn small_moves_are_not_pushed() {
    let (chain, sink, mut keeper) = setup(keeper_config());

    let first = keeper.tick().await;
    assert!(first.pushed);
    assert_eq!(first.price_e6, Some(1_000_000));

    // 0.05% move stays under the 10 bps threshold.
    chain.set_reserves(ONE, ONE + ONE / 2_000);
    let second = keeper.tick().await;
    assert_eq!(second.price_e6, Some(1_000_500));
    assert!(!second.pushed);

    // 0.2% move crosses it.
    chain.set_reserves(ONE, ONE + ONE / 500);
    assert!(keeper.tick().await.pushed);

    assert_eq!(sink.pushed_prices(), vec![1_000_000, 1_002_000]);
    let snap = keeper.snapshot();
    assert_eq!(snap.price_updates, 2);
    assert_eq!(snap.cranks, 3);
    assert_eq!(snap.errors, 0);
    assert_eq!(snap.last_pushed_price_e6, Some(1_002_000));
}

#[tokio::test(start_paused = true)]
async fn unchanged_price_is_forced_out_periodically() {
    let mut cfg = keeper_config();
    cfg.force_push_every = 3;
    let (_chain, sink, mut keeper) = setup(cfg);

    let pushed: Vec<bool> = {
        let mut v = Vec::new();
        for _ in 0..7 {
            v.push(keeper.tick().await.pushed);
        }
        v
    };
    assert_eq!(pushed, vec![true, false, false, true, false, false, true]);
    assert_eq!(sink.pushed_prices().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn empty_pool_never_pushes() {
    let (chain, sink, mut keeper) = setup(keeper_config());
    chain.set_reserves(0, ONE);
    for _ in 0..3 {
        let out = keeper.tick().await;
        assert_eq!(out.price_e6, Some(0));
        assert!(!out.pushed);
    }
    assert!(sink.pushed_prices().is_empty());
    assert_eq!(keeper.snapshot().errors, 0);
    assert_eq!(keeper.snapshot().cranks, 3);
}

#[tokio::test(start_paused = true)]
async fn push_failure_is_counted_and_retried() {
    let (_chain, sink, mut keeper) = setup(keeper_config());
    sink.fail_pushes.store(true, Ordering::SeqCst);

    assert!(!keeper.tick().await.pushed);
    assert!(!keeper.tick().await.pushed);
    assert_eq!(keeper.snapshot().errors, 2);
    assert_eq!(keeper.snapshot().price_updates, 0);

    sink.fail_pushes.store(false, Ordering::SeqCst);
    assert!(keeper.tick().await.pushed);
    assert_eq!(keeper.snapshot().errors, 2);
}

#[tokio::test(start_paused = true)]
async fn pool_read_failure_still_cranks() {
    let (chain, _sink, mut keeper) = setup(keeper_config());
    chain.remove(&pk(QUOTE_VAULT));

    let out = keeper.tick().await;
    assert_eq!(out.price_e6, None);
    assert!(out.cranked);
    let snap = keeper.snapshot();
    assert_eq!(snap.errors, 1);
    assert_eq!(snap.cranks, 1);
}

// --- Cranks ---

#[tokio::test(start_paused = true)]
async fn crank_failures_are_benign() {
    let (_chain, sink, mut keeper) = setup(keeper_config());
    sink.fail_cranks.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        assert!(!keeper.tick().await.cranked);
    }
    let snap = keeper.snapshot();
    assert_eq!(snap.cranks, 0);
    assert_eq!(snap.errors, 0);
    assert_eq!(snap.since_last_crank, None);
    assert_eq!(snap.price_updates, 1);
}

#[tokio::test(start_paused = true)]
async fn crank_shape() {
    let mut cfg = keeper_config();
    cfg.pool = None;
    let (_chain, sink, mut keeper) = setup(cfg);
    keeper.tick().await;

    let cranks = sink.sent_with_tag(TAG_KEEPER_CRANK);
    assert_eq!(cranks.len(), 1);
    let (ix, units) = &cranks[0];
    assert_eq!(*units, 400_000);
    assert_eq!(ix.program_id, pk(PROGRAM));
    assert_eq!(ix.data, vec![TAG_KEEPER_CRANK, 0xFF, 0xFF, 0]);
    assert_eq!(ix.accounts[0].pubkey, pk(KEEPER));
    // Authority-priced market: the slab doubles as the oracle account.
    assert_eq!(ix.accounts[3].pubkey, pk(SLAB));
    assert!(sink.pushed_prices().is_empty());
}

// --- Reports ---

#[tokio::test(start_paused = true)]
async fn periodic_report_tracks_burn() {
    let mut cfg = keeper_config();
    cfg.report_every = 2;
    cfg.collateral_decimals = 3;
    let (chain, _sink, mut keeper) = setup(cfg);

    let fund = keeper.prime().await.unwrap();
    assert_eq!(fund.balance, 5_000);

    assert!(keeper.tick().await.report.is_none());
    chain.set(pk(SLAB), slab_bytes(6_000));
    tokio::time::advance(Duration::from_secs(1800)).await;

    let report = keeper.tick().await.report.expect("report on the second iteration");
    let ins = report.insurance.expect("slab readable");
    assert_eq!(ins.current, 6_000);
    assert_eq!(ins.burned, 1_000);
    assert_eq!(ins.burn_per_hour, 2_000);
    assert_eq!(report.cranks, 2);
    assert_eq!(report.uptime, Duration::from_secs(1800));

    let text = report.to_string();
    assert!(text.contains("uptime 30m 0s"), "{text}");
    assert!(text.contains("insurance 6.000"), "{text}");
    assert!(text.contains("burned +1.000 (+2.000/h)"), "{text}");
}

#[tokio::test(start_paused = true)]
async fn report_without_slab_omits_insurance() {
    let (chain, _sink, mut keeper) = setup(keeper_config());
    keeper.prime().await.unwrap();
    chain.remove(&pk(SLAB));
    let report = keeper.report().await;
    assert!(report.insurance.is_none());
    assert!(!report.to_string().contains("insurance"));
}

#[tokio::test(start_paused = true)]
async fn prime_fails_without_slab() {
    let (chain, _sink, mut keeper) = setup(keeper_config());
    chain.remove(&pk(SLAB));
    let err = keeper.prime().await.unwrap_err();
    assert!(matches!(err, KeeperError::AccountNotFound(k) if k == pk(SLAB)));
}

// --- Lifecycle ---

#[tokio::test(start_paused = true)]
async fn cancellation_stops_loop_with_final_report() {
    let (_chain, sink, mut keeper) = setup(keeper_config());
    keeper.prime().await.unwrap();

    let cancel = CancellationToken::new();
    *sink.cancel_after_cranks.lock().unwrap() = Some((3, cancel.clone()));

    let report = keeper.run(cancel).await;
    assert_eq!(report.cranks, 3);
    assert_eq!(report.price_updates, 1);
    assert_eq!(report.insurance.map(|i| i.current), Some(5_000));

    let snap = keeper.snapshot();
    assert_eq!(snap.phase, Phase::Stopped);
    assert_eq!(snap.iterations, 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_runs_nothing() {
    let (_chain, sink, mut keeper) = setup(keeper_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = keeper.run(cancel).await;
    assert_eq!(report.cranks, 0);
    assert!(sink.sent.lock().unwrap().is_empty());
    assert_eq!(keeper.snapshot().phase, Phase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn loop_sleeps_between_iterations() {
    let (_chain, sink, mut keeper) = setup(keeper_config());
    let cancel = CancellationToken::new();
    *sink.cancel_after_cranks.lock().unwrap() = Some((4, cancel.clone()));

    let start = tokio::time::Instant::now();
    keeper.run(cancel).await;
    // Three full sleeps; the fourth is cut short by cancellation.
    assert_eq!(start.elapsed(), Duration::from_millis(1500));
}

// --- Sampling ---

/// Serves `chain`, applying the next scripted reserve pair on every pool read.
/// `None` makes that pool read fail.
struct ScriptedPool {
    chain: Arc<MockChain>,
    script: Mutex<VecDeque<Option<(u64, u64)>>>,
    pool_reads: Mutex<usize>,
}

impl ScriptedPool {
    fn new(script: Vec<Option<(u64, u64)>>) -> Self {
        ScriptedPool {
            chain: MockChain::new(ONE, ONE),
            script: Mutex::new(script.into()),
            pool_reads: Mutex::new(0),
        }
    }
}

#[async_trait]
impl AccountSource for ScriptedPool {
    async fn account_data(&self, key: &Pubkey) -> Result<Vec<u8>, KeeperError> {
        if *key == pk(POOL) {
            *self.pool_reads.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(Some((base, quote))) => self.chain.set_reserves(base, quote),
                Some(None) => return Err(KeeperError::Rpc("pool read timed out".into())),
                None => {}
            }
        }
        self.chain.account_data(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn smoothed_price_averages_spaced_samples() {
    let source = ScriptedPool::new(vec![
        Some((ONE, ONE)),
        Some((ONE, 2 * ONE)),
        Some((ONE, 3 * ONE)),
    ]);
    let delay = Duration::from_millis(200);

    let start = tokio::time::Instant::now();
    let smoothed = price::smoothed_price(&source, &pk(POOL), 9, 9, 3, delay).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(400));

    assert_eq!(smoothed.samples, 3);
    assert_eq!(smoothed.price_e6, 2_000_000);
    assert_eq!(smoothed.price, 2.0);
    assert_eq!(smoothed.min, 1.0);
    assert_eq!(smoothed.max, 3.0);
    assert_eq!(*source.pool_reads.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn smoothed_price_stops_at_first_failed_sample() {
    let source = ScriptedPool::new(vec![Some((ONE, ONE)), None, Some((ONE, ONE))]);
    let err = price::smoothed_price(&source, &pk(POOL), 9, 9, 3, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, KeeperError::Rpc(_)), "{err}");
    assert_eq!(*source.pool_reads.lock().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn smoothed_price_needs_a_sample() {
    let source = ScriptedPool::new(Vec::new());
    let err = price::smoothed_price(&source, &pk(POOL), 9, 9, 0, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, KeeperError::Config(_)), "{err}");
    assert_eq!(*source.pool_reads.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn monitor_skips_failed_reads() {
    let source = ScriptedPool::new(vec![
        Some((ONE, ONE)),
        None,
        Some((ONE, 2 * ONE)),
        Some((ONE, 3 * ONE)),
    ]);
    let interval = Duration::from_millis(250);

    let start = tokio::time::Instant::now();
    let samples: Vec<_> = price::monitor(&source, pk(POOL), 9, 9, interval).take(3).collect().await;
    // One interval before each later sample, plus one after the failed read.
    assert_eq!(start.elapsed(), 3 * interval);

    let prices: Vec<u128> = samples.iter().map(|s| s.price_e6).collect();
    assert_eq!(prices, vec![1_000_000, 2_000_000, 3_000_000]);
    assert_eq!(*source.pool_reads.lock().unwrap(), 4);
}

#[tokio::test(start_paused = true)]
async fn monitor_outlasts_a_missing_vault() {
    let source = ScriptedPool::new(Vec::new());
    let interval = Duration::from_millis(100);
    let mut stream = Box::pin(price::monitor(&source, pk(POOL), 9, 9, interval));

    assert_eq!(stream.next().await.map(|s| s.price_e6), Some(1_000_000));

    source.chain.remove(&pk(BASE_VAULT));
    let chain = source.chain.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        chain.set_reserves(ONE, 4 * ONE);
    });

    let next = stream.next().await.unwrap();
    assert_eq!(next.price_e6, 4_000_000);
    assert_eq!(*source.pool_reads.lock().unwrap(), 5);
}
