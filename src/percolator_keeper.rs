//! Percolator keeper: slab and pool codecs, instruction encoder, price relay loop.

#![deny(unsafe_code)]

pub mod config;
pub mod keeper;
pub mod price;
pub mod rpc;
pub mod tags;

// 1. mod constants
pub mod constants {
    pub const MAGIC: u64 = 0x504552434f4c4154; // "PERCOLAT"
    pub const VERSION: u32 = 1;

    pub const HEADER_LEN: usize = 96;
    pub const CONFIG_OFF: usize = HEADER_LEN;
    pub const CONFIG_LEN: usize = 144;
    /// 128-bit engine fields are stored as `[u64; 2]`, so the engine is 8-aligned.
    pub const ENGINE_ALIGN: usize = 8;

    pub const fn align_up(x: usize, a: usize) -> usize {
        (x + (a - 1)) & !(a - 1)
    }

    pub const ENGINE_OFF: usize = align_up(HEADER_LEN + CONFIG_LEN, ENGINE_ALIGN);

    // Engine-relative offsets of the fields read on their own.
    pub const ENG_VAULT: usize = 0;
    pub const ENG_INSURANCE_BALANCE: usize = 16;
    pub const ENG_INSURANCE_FEE_REVENUE: usize = 32;
    pub const ENG_PARAMS: usize = 48;
    pub const PARAMS_LEN: usize = 144;
    pub const ENG_CURRENT_SLOT: usize = ENG_PARAMS + PARAMS_LEN;
    pub const ENG_LAST_CRANK_SLOT: usize = 232;
    pub const ENG_LIQ_CURSOR: usize = 296;
    pub const ENG_CRANK_CURSOR: usize = 320;
    pub const ENG_NET_LP_POS: usize = 344;
    pub const ENGINE_FIXED_LEN: usize = 408;

    pub const ACCOUNT_LEN: usize = 240;
    pub const ACC_KIND: usize = 24;
    pub const ACC_POSITION_SIZE: usize = 80;
    pub const ACC_OWNER: usize = 184;

    /// Slot capacities the program is built with; production uses the last one.
    pub const SUPPORTED_CAPACITIES: [usize; 4] = [64, 256, 1024, 4096];
    pub const MAX_ACCOUNTS: usize = 4096;

    pub const FLAG_RESOLVED: u8 = 1 << 0;
    pub const FLAG_PAUSED: u8 = 1 << 1;

    /// Caller index used for permissionless cranks.
    pub const CRANK_NO_CALLER: u16 = u16::MAX;

    pub const PRICE_SCALE: u128 = 1_000_000;
    pub const BPS_DENOM: u128 = 10_000;

    // Compute-unit budgets per transaction kind.
    pub const CU_ADMIN: u32 = 50_000;
    pub const CU_PUSH_PRICE: u32 = 50_000;
    pub const CU_DEPOSIT: u32 = 100_000;
    pub const CU_INIT_MARKET: u32 = 200_000;
    pub const CU_CRANK: u32 = 400_000;
}

// 2. mod error
pub mod error {
    use core::fmt::Display;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum KeeperError {
        #[error("malformed {account} account: {reason}")]
        MalformedAccount {
            account: &'static str,
            reason: String,
        },
        #[error("{field} = {value} does not fit in {width}")]
        FieldOverflow {
            field: &'static str,
            value: String,
            width: &'static str,
        },
        #[error("{instruction} expects {expected} account keys, got {got}")]
        AccountListMismatch {
            instruction: &'static str,
            expected: usize,
            got: usize,
        },
        #[error("transaction submission failed: {0}")]
        SubmissionFailure(String),
        #[error("account {0} not found")]
        AccountNotFound(Pubkey),
        #[error("rpc request failed: {0}")]
        Rpc(String),
        #[error("invalid configuration: {0}")]
        Config(String),
        #[error(transparent)]
        Io(#[from] std::io::Error),
        #[error(transparent)]
        Json(#[from] serde_json::Error),
    }

    impl KeeperError {
        pub fn malformed(account: &'static str, reason: impl Into<String>) -> Self {
            KeeperError::MalformedAccount {
                account,
                reason: reason.into(),
            }
        }

        pub fn truncated(account: &'static str, needed: usize, got: usize) -> Self {
            Self::malformed(account, format!("need {needed} bytes, have {got}"))
        }

        pub fn overflow(field: &'static str, value: impl Display, width: &'static str) -> Self {
            KeeperError::FieldOverflow {
                field,
                value: value.to_string(),
                width,
            }
        }

        pub fn is_malformed(&self) -> bool {
            matches!(self, KeeperError::MalformedAccount { .. })
        }

        pub fn is_overflow(&self) -> bool {
            matches!(self, KeeperError::FieldOverflow { .. })
        }
    }

    /// Token-program unpack errors surface as malformed account data.
    pub fn map_program_error(account: &'static str, e: ProgramError) -> KeeperError {
        KeeperError::malformed(account, e.to_string())
    }
}

// 3. mod codec
pub mod codec {
    use crate::error::KeeperError;
    use solana_program::pubkey::Pubkey;

    /// Bounds-checked little-endian reader. Every read names the account it
    /// belongs to so a short buffer reports which schema it failed.
    pub struct Reader<'a> {
        account: &'static str,
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        pub fn new(account: &'static str, data: &'a [u8]) -> Self {
            Self::at(account, data, 0)
        }

        pub fn at(account: &'static str, data: &'a [u8], pos: usize) -> Self {
            Self { account, data, pos }
        }

        pub fn position(&self) -> usize {
            self.pos
        }

        pub fn remaining(&self) -> usize {
            self.data.len().saturating_sub(self.pos)
        }

        pub fn skip(&mut self, n: usize) -> Result<(), KeeperError> {
            self.take_slice(n).map(|_| ())
        }

        fn take_slice(&mut self, n: usize) -> Result<&'a [u8], KeeperError> {
            let end = self
                .pos
                .checked_add(n)
                .ok_or_else(|| KeeperError::truncated(self.account, usize::MAX, self.data.len()))?;
            let bytes = self
                .data
                .get(self.pos..end)
                .ok_or_else(|| KeeperError::truncated(self.account, end, self.data.len()))?;
            self.pos = end;
            Ok(bytes)
        }

        fn take<const N: usize>(&mut self) -> Result<[u8; N], KeeperError> {
            let bytes = self.take_slice(N)?;
            let mut out = [0u8; N];
            out.copy_from_slice(bytes);
            Ok(out)
        }

        pub fn read_u8(&mut self) -> Result<u8, KeeperError> {
            Ok(self.take::<1>()?[0])
        }

        pub fn read_u16(&mut self) -> Result<u16, KeeperError> {
            Ok(u16::from_le_bytes(self.take()?))
        }

        pub fn read_u32(&mut self) -> Result<u32, KeeperError> {
            Ok(u32::from_le_bytes(self.take()?))
        }

        pub fn read_u64(&mut self) -> Result<u64, KeeperError> {
            Ok(u64::from_le_bytes(self.take()?))
        }

        pub fn read_i64(&mut self) -> Result<i64, KeeperError> {
            Ok(i64::from_le_bytes(self.take()?))
        }

        pub fn read_u128(&mut self) -> Result<u128, KeeperError> {
            Ok(u128::from_le_bytes(self.take()?))
        }

        pub fn read_i128(&mut self) -> Result<i128, KeeperError> {
            Ok(i128::from_le_bytes(self.take()?))
        }

        pub fn read_bytes32(&mut self) -> Result<[u8; 32], KeeperError> {
            self.take()
        }

        pub fn read_pubkey(&mut self) -> Result<Pubkey, KeeperError> {
            Ok(Pubkey::new_from_array(self.take()?))
        }
    }

    /// Destination for packed little-endian fields.
    pub trait FieldSink {
        fn put(&mut self, bytes: &[u8]) -> Result<(), KeeperError>;

        fn put_u8(&mut self, v: u8) -> Result<(), KeeperError> {
            self.put(&[v])
        }
        fn put_u16(&mut self, v: u16) -> Result<(), KeeperError> {
            self.put(&v.to_le_bytes())
        }
        fn put_u32(&mut self, v: u32) -> Result<(), KeeperError> {
            self.put(&v.to_le_bytes())
        }
        fn put_u64(&mut self, v: u64) -> Result<(), KeeperError> {
            self.put(&v.to_le_bytes())
        }
        fn put_i64(&mut self, v: i64) -> Result<(), KeeperError> {
            self.put(&v.to_le_bytes())
        }
        fn put_u128(&mut self, v: u128) -> Result<(), KeeperError> {
            self.put(&v.to_le_bytes())
        }
        fn put_i128(&mut self, v: i128) -> Result<(), KeeperError> {
            self.put(&v.to_le_bytes())
        }
        fn put_pubkey(&mut self, v: &Pubkey) -> Result<(), KeeperError> {
            self.put(v.as_ref())
        }
    }

    /// Writes into a fixed-size account image.
    pub struct Writer<'a> {
        account: &'static str,
        data: &'a mut [u8],
        pos: usize,
    }

    impl<'a> Writer<'a> {
        pub fn at(account: &'static str, data: &'a mut [u8], pos: usize) -> Self {
            Self { account, data, pos }
        }

        pub fn position(&self) -> usize {
            self.pos
        }

        pub fn skip(&mut self, n: usize) -> Result<(), KeeperError> {
            let end = self.pos.saturating_add(n);
            if end > self.data.len() {
                return Err(KeeperError::truncated(self.account, end, self.data.len()));
            }
            self.pos = end;
            Ok(())
        }
    }

    impl FieldSink for Writer<'_> {
        fn put(&mut self, bytes: &[u8]) -> Result<(), KeeperError> {
            let end = self.pos.saturating_add(bytes.len());
            let len = self.data.len();
            let account = self.account;
            let dst = self
                .data
                .get_mut(self.pos..end)
                .ok_or_else(|| KeeperError::truncated(account, end, len))?;
            dst.copy_from_slice(bytes);
            self.pos = end;
            Ok(())
        }
    }

    /// Growable instruction payload, starting with the discriminator byte.
    #[derive(Debug, Default)]
    pub struct Payload(Vec<u8>);

    impl Payload {
        pub fn new(tag: u8) -> Self {
            Payload(vec![tag])
        }

        pub fn into_bytes(self) -> Vec<u8> {
            self.0
        }
    }

    impl FieldSink for Payload {
        fn put(&mut self, bytes: &[u8]) -> Result<(), KeeperError> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }
    }

    pub fn require_len(account: &'static str, data: &[u8], len: usize) -> Result<(), KeeperError> {
        if data.len() < len {
            return Err(KeeperError::truncated(account, len, data.len()));
        }
        Ok(())
    }

    pub fn fit_u16(field: &'static str, v: u128) -> Result<u16, KeeperError> {
        u16::try_from(v).map_err(|_| KeeperError::overflow(field, v, "u16"))
    }

    pub fn fit_u32(field: &'static str, v: u128) -> Result<u32, KeeperError> {
        u32::try_from(v).map_err(|_| KeeperError::overflow(field, v, "u32"))
    }

    pub fn fit_u64(field: &'static str, v: u128) -> Result<u64, KeeperError> {
        u64::try_from(v).map_err(|_| KeeperError::overflow(field, v, "u64"))
    }

    pub fn is_zero_address(key: &Pubkey) -> bool {
        key.as_ref().iter().all(|&b| b == 0)
    }

    pub fn bit_is_set(words: &[u64], idx: usize) -> bool {
        words
            .get(idx / 64)
            .map_or(false, |w| (w >> (idx % 64)) & 1 == 1)
    }
}

// 4. mod state
pub mod state {
    use crate::codec::{self, FieldSink, Reader, Writer};
    use crate::constants::*;
    use crate::error::KeeperError;
    use bytemuck::{Pod, Zeroable};
    use core::fmt;
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::pubkey::Pubkey;

    const SLAB: &str = "slab";

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct RawSlabHeader {
        pub magic: u64,
        pub version: u32,
        pub bump: u8,
        pub flags: u8,
        pub _padding: [u8; 2],
        pub admin: [u8; 32],
        pub oracle_authority: [u8; 32],
        pub req_nonce: u64,
        pub last_thr_update_slot: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct RawMarketConfig {
        pub collateral_mint: [u8; 32],
        pub vault_pubkey: [u8; 32],
        pub index_feed_id: [u8; 32],
        pub max_staleness_secs: u64,
        pub conf_filter_bps: u16,
        pub vault_authority_bump: u8,
        pub invert: u8,
        pub unit_scale: u32,
        pub authority_price_e6: u64,
        pub authority_timestamp: i64,
        pub oracle_price_cap_e2bps: u64,
        pub last_effective_price_e6: u64,
    }

    const _: () = assert!(core::mem::size_of::<RawSlabHeader>() == HEADER_LEN);
    const _: () = assert!(core::mem::size_of::<RawMarketConfig>() == CONFIG_LEN);

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SlabHeader {
        pub magic: u64,
        pub version: u32,
        pub bump: u8,
        pub flags: u8,
        pub admin: Pubkey,
        pub oracle_authority: Pubkey,
        pub req_nonce: u64,
        pub last_thr_update_slot: u64,
    }

    /// Whether privileged instructions can still reach the market.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum AdminStatus {
        Renounced,
        Active(Pubkey),
    }

    impl fmt::Display for AdminStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                AdminStatus::Renounced => write!(f, "renounced (market is immutable)"),
                AdminStatus::Active(admin) => write!(f, "{admin}"),
            }
        }
    }

    impl SlabHeader {
        pub fn admin_status(&self) -> AdminStatus {
            if codec::is_zero_address(&self.admin) {
                AdminStatus::Renounced
            } else {
                AdminStatus::Active(self.admin)
            }
        }

        pub fn is_immutable(&self) -> bool {
            self.admin_status() == AdminStatus::Renounced
        }

        pub fn oracle_authority_enabled(&self) -> bool {
            !codec::is_zero_address(&self.oracle_authority)
        }

        pub fn is_resolved(&self) -> bool {
            self.flags & FLAG_RESOLVED != 0
        }

        pub fn is_paused(&self) -> bool {
            self.flags & FLAG_PAUSED != 0
        }

        fn to_raw(&self) -> RawSlabHeader {
            RawSlabHeader {
                magic: self.magic,
                version: self.version,
                bump: self.bump,
                flags: self.flags,
                _padding: [0; 2],
                admin: self.admin.to_bytes(),
                oracle_authority: self.oracle_authority.to_bytes(),
                req_nonce: self.req_nonce,
                last_thr_update_slot: self.last_thr_update_slot,
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct MarketConfig {
        pub collateral_mint: Pubkey,
        pub vault: Pubkey,
        /// All zeros when the market is priced by its oracle authority.
        pub index_feed_id: [u8; 32],
        pub max_staleness_secs: u64,
        pub conf_filter_bps: u16,
        pub vault_authority_bump: u8,
        pub invert: u8,
        pub unit_scale: u32,
        pub authority_price_e6: u64,
        pub authority_timestamp: i64,
        pub oracle_price_cap_e2bps: u64,
        pub last_effective_price_e6: u64,
    }

    impl MarketConfig {
        pub fn is_authority_priced(&self) -> bool {
            self.index_feed_id == [0u8; 32]
        }

        pub fn is_inverted(&self) -> bool {
            self.invert != 0
        }

        fn to_raw(&self) -> RawMarketConfig {
            RawMarketConfig {
                collateral_mint: self.collateral_mint.to_bytes(),
                vault_pubkey: self.vault.to_bytes(),
                index_feed_id: self.index_feed_id,
                max_staleness_secs: self.max_staleness_secs,
                conf_filter_bps: self.conf_filter_bps,
                vault_authority_bump: self.vault_authority_bump,
                invert: self.invert,
                unit_scale: self.unit_scale,
                authority_price_e6: self.authority_price_e6,
                authority_timestamp: self.authority_timestamp,
                oracle_price_cap_e2bps: self.oracle_price_cap_e2bps,
                last_effective_price_e6: self.last_effective_price_e6,
            }
        }
    }

    /// Risk parameters. The same field order is used inside the slab and in
    /// the InitMarket payload.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RiskParams {
        pub warmup_period_slots: u64,
        pub maintenance_margin_bps: u64,
        pub initial_margin_bps: u64,
        pub trading_fee_bps: u64,
        pub max_accounts: u64,
        pub new_account_fee: u128,
        pub risk_reduction_threshold: u128,
        pub maintenance_fee_per_slot: u128,
        pub max_crank_staleness_slots: u64,
        pub liquidation_fee_bps: u64,
        pub liquidation_fee_cap: u128,
        pub liquidation_buffer_bps: u64,
        pub min_liquidation_abs: u128,
    }

    impl RiskParams {
        pub fn read(r: &mut Reader<'_>) -> Result<Self, KeeperError> {
            Ok(RiskParams {
                warmup_period_slots: r.read_u64()?,
                maintenance_margin_bps: r.read_u64()?,
                initial_margin_bps: r.read_u64()?,
                trading_fee_bps: r.read_u64()?,
                max_accounts: r.read_u64()?,
                new_account_fee: r.read_u128()?,
                risk_reduction_threshold: r.read_u128()?,
                maintenance_fee_per_slot: r.read_u128()?,
                max_crank_staleness_slots: r.read_u64()?,
                liquidation_fee_bps: r.read_u64()?,
                liquidation_fee_cap: r.read_u128()?,
                liquidation_buffer_bps: r.read_u64()?,
                min_liquidation_abs: r.read_u128()?,
            })
        }

        pub fn write<S: FieldSink>(&self, w: &mut S) -> Result<(), KeeperError> {
            w.put_u64(self.warmup_period_slots)?;
            w.put_u64(self.maintenance_margin_bps)?;
            w.put_u64(self.initial_margin_bps)?;
            w.put_u64(self.trading_fee_bps)?;
            w.put_u64(self.max_accounts)?;
            w.put_u128(self.new_account_fee)?;
            w.put_u128(self.risk_reduction_threshold)?;
            w.put_u128(self.maintenance_fee_per_slot)?;
            w.put_u64(self.max_crank_staleness_slots)?;
            w.put_u64(self.liquidation_fee_bps)?;
            w.put_u128(self.liquidation_fee_cap)?;
            w.put_u64(self.liquidation_buffer_bps)?;
            w.put_u128(self.min_liquidation_abs)
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InsuranceFund {
        pub balance: u128,
        pub fee_revenue: u128,
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct EngineState {
        pub vault: u128,
        pub insurance_fund: InsuranceFund,
        pub params: RiskParams,
        pub current_slot: u64,
        pub funding_index_qpb_e6: i128,
        pub last_funding_slot: u64,
        pub funding_rate_bps_per_slot_last: i64,
        pub last_crank_slot: u64,
        pub max_crank_staleness_slots: u64,
        pub total_open_interest: u128,
        pub c_tot: u128,
        pub pnl_pos_tot: u128,
        pub liq_cursor: u16,
        pub gc_cursor: u16,
        pub crank_cursor: u16,
        pub sweep_start_idx: u16,
        pub last_full_sweep_start_slot: u64,
        pub last_full_sweep_completed_slot: u64,
        pub lifetime_liquidations: u64,
        pub lifetime_force_realize_closes: u64,
        pub net_lp_pos: i128,
        pub lp_sum_abs: u128,
        pub lp_max_abs: u128,
        pub lp_max_abs_sweep: u128,
        pub num_used_accounts: u16,
        pub next_account_id: u64,
        pub free_head: u16,
    }

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
    pub enum AccountKind {
        User = 0,
        LP = 1,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Account {
        pub account_id: u64,
        pub capital: u128,
        pub kind: AccountKind,
        pub pnl: i128,
        pub reserved_pnl: u64,
        pub warmup_started_at_slot: u64,
        pub warmup_slope_per_step: u128,
        pub position_size: i128,
        pub entry_price: u64,
        pub funding_index: i128,
        pub matcher_program: Pubkey,
        pub matcher_context: Pubkey,
        pub owner: Pubkey,
        pub fee_credits: i128,
        pub last_fee_slot: u64,
    }

    impl Account {
        pub fn is_lp(&self) -> bool {
            self.kind == AccountKind::LP
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, KeeperError> {
            let account_id = r.read_u64()?;
            let capital = r.read_u128()?;
            let tag = r.read_u8()?;
            let kind = AccountKind::from_u8(tag)
                .ok_or_else(|| {
                    KeeperError::malformed(SLAB, format!("unknown account kind {tag}"))
                })?;
            r.skip(7)?;
            Ok(Account {
                account_id,
                capital,
                kind,
                pnl: r.read_i128()?,
                reserved_pnl: r.read_u64()?,
                warmup_started_at_slot: r.read_u64()?,
                warmup_slope_per_step: r.read_u128()?,
                position_size: r.read_i128()?,
                entry_price: r.read_u64()?,
                funding_index: r.read_i128()?,
                matcher_program: r.read_pubkey()?,
                matcher_context: r.read_pubkey()?,
                owner: r.read_pubkey()?,
                fee_credits: r.read_i128()?,
                last_fee_slot: r.read_u64()?,
            })
        }

        fn write(&self, w: &mut Writer<'_>) -> Result<(), KeeperError> {
            w.put_u64(self.account_id)?;
            w.put_u128(self.capital)?;
            w.put_u8(self.kind as u8)?;
            w.skip(7)?;
            w.put_i128(self.pnl)?;
            w.put_u64(self.reserved_pnl)?;
            w.put_u64(self.warmup_started_at_slot)?;
            w.put_u128(self.warmup_slope_per_step)?;
            w.put_i128(self.position_size)?;
            w.put_u64(self.entry_price)?;
            w.put_i128(self.funding_index)?;
            w.put_pubkey(&self.matcher_program)?;
            w.put_pubkey(&self.matcher_context)?;
            w.put_pubkey(&self.owner)?;
            w.put_i128(self.fee_credits)?;
            w.put_u64(self.last_fee_slot)
        }
    }

    /// Offsets of the capacity-dependent tail of the engine region.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SlabLayout {
        max_accounts: usize,
    }

    impl SlabLayout {
        pub const PRODUCTION: SlabLayout = SlabLayout::new(MAX_ACCOUNTS);

        pub const fn new(max_accounts: usize) -> Self {
            Self { max_accounts }
        }

        pub fn detect(len: usize) -> Result<Self, KeeperError> {
            SUPPORTED_CAPACITIES
                .iter()
                .map(|&n| SlabLayout::new(n))
                .find(|l| l.slab_len() == len)
                .ok_or_else(|| {
                    KeeperError::malformed(
                        SLAB,
                        format!("length {len} matches no known slab capacity"),
                    )
                })
        }

        pub const fn max_accounts(&self) -> usize {
            self.max_accounts
        }

        pub const fn bitmap_words(&self) -> usize {
            (self.max_accounts + 63) / 64
        }

        pub const fn bitmap_off(&self) -> usize {
            ENGINE_OFF + ENGINE_FIXED_LEN
        }

        pub const fn num_used_off(&self) -> usize {
            self.bitmap_off() + 8 * self.bitmap_words()
        }

        pub const fn next_account_id_off(&self) -> usize {
            self.num_used_off() + 8
        }

        pub const fn free_head_off(&self) -> usize {
            self.next_account_id_off() + 8
        }

        pub const fn next_free_off(&self) -> usize {
            self.free_head_off() + 2
        }

        pub const fn accounts_off(&self) -> usize {
            align_up(self.next_free_off() + 2 * self.max_accounts, ENGINE_ALIGN)
        }

        pub const fn account_off(&self, idx: usize) -> usize {
            self.accounts_off() + idx * ACCOUNT_LEN
        }

        pub const fn slab_len(&self) -> usize {
            self.account_off(self.max_accounts)
        }
    }

    pub fn parse_header(data: &[u8]) -> Result<SlabHeader, KeeperError> {
        codec::require_len(SLAB, data, HEADER_LEN)?;
        let mut raw = RawSlabHeader::zeroed();
        bytemuck::bytes_of_mut(&mut raw).copy_from_slice(&data[..HEADER_LEN]);
        if raw.magic != MAGIC {
            return Err(KeeperError::malformed(SLAB, format!("bad magic {:#x}", raw.magic)));
        }
        if raw.version != VERSION {
            let reason = format!("unsupported version {}", raw.version);
            return Err(KeeperError::malformed(SLAB, reason));
        }
        Ok(SlabHeader {
            magic: raw.magic,
            version: raw.version,
            bump: raw.bump,
            flags: raw.flags,
            admin: Pubkey::new_from_array(raw.admin),
            oracle_authority: Pubkey::new_from_array(raw.oracle_authority),
            req_nonce: raw.req_nonce,
            last_thr_update_slot: raw.last_thr_update_slot,
        })
    }

    pub fn parse_config(data: &[u8]) -> Result<MarketConfig, KeeperError> {
        codec::require_len(SLAB, data, CONFIG_OFF + CONFIG_LEN)?;
        let mut c = RawMarketConfig::zeroed();
        bytemuck::bytes_of_mut(&mut c).copy_from_slice(&data[CONFIG_OFF..CONFIG_OFF + CONFIG_LEN]);
        Ok(MarketConfig {
            collateral_mint: Pubkey::new_from_array(c.collateral_mint),
            vault: Pubkey::new_from_array(c.vault_pubkey),
            index_feed_id: c.index_feed_id,
            max_staleness_secs: c.max_staleness_secs,
            conf_filter_bps: c.conf_filter_bps,
            vault_authority_bump: c.vault_authority_bump,
            invert: c.invert,
            unit_scale: c.unit_scale,
            authority_price_e6: c.authority_price_e6,
            authority_timestamp: c.authority_timestamp,
            oracle_price_cap_e2bps: c.oracle_price_cap_e2bps,
            last_effective_price_e6: c.last_effective_price_e6,
        })
    }

    pub fn parse_params(data: &[u8]) -> Result<RiskParams, KeeperError> {
        RiskParams::read(&mut Reader::at(SLAB, data, ENGINE_OFF + ENG_PARAMS))
    }

    /// Reads only the insurance fund; enough for burn accounting.
    pub fn parse_insurance(data: &[u8]) -> Result<InsuranceFund, KeeperError> {
        let mut r = Reader::at(SLAB, data, ENGINE_OFF + ENG_INSURANCE_BALANCE);
        Ok(InsuranceFund {
            balance: r.read_u128()?,
            fee_revenue: r.read_u128()?,
        })
    }

    pub fn parse_engine(data: &[u8], layout: &SlabLayout) -> Result<EngineState, KeeperError> {
        let mut r = Reader::at(SLAB, data, ENGINE_OFF + ENG_VAULT);
        let vault = r.read_u128()?;
        let insurance_fund = InsuranceFund {
            balance: r.read_u128()?,
            fee_revenue: r.read_u128()?,
        };
        let params = RiskParams::read(&mut r)?;
        let mut engine = EngineState {
            vault,
            insurance_fund,
            params,
            current_slot: r.read_u64()?,
            funding_index_qpb_e6: r.read_i128()?,
            last_funding_slot: r.read_u64()?,
            funding_rate_bps_per_slot_last: r.read_i64()?,
            last_crank_slot: r.read_u64()?,
            max_crank_staleness_slots: r.read_u64()?,
            total_open_interest: r.read_u128()?,
            c_tot: r.read_u128()?,
            pnl_pos_tot: r.read_u128()?,
            ..EngineState::default()
        };

        debug_assert_eq!(r.position(), ENGINE_OFF + ENG_LIQ_CURSOR);
        engine.liq_cursor = r.read_u16()?;
        engine.gc_cursor = r.read_u16()?;
        r.skip(4)?;
        engine.last_full_sweep_start_slot = r.read_u64()?;
        engine.last_full_sweep_completed_slot = r.read_u64()?;

        debug_assert_eq!(r.position(), ENGINE_OFF + ENG_CRANK_CURSOR);
        engine.crank_cursor = r.read_u16()?;
        engine.sweep_start_idx = r.read_u16()?;
        r.skip(4)?;
        engine.lifetime_liquidations = r.read_u64()?;
        engine.lifetime_force_realize_closes = r.read_u64()?;

        debug_assert_eq!(r.position(), ENGINE_OFF + ENG_NET_LP_POS);
        engine.net_lp_pos = r.read_i128()?;
        engine.lp_sum_abs = r.read_u128()?;
        engine.lp_max_abs = r.read_u128()?;
        engine.lp_max_abs_sweep = r.read_u128()?;
        debug_assert_eq!(r.position(), layout.bitmap_off());

        engine.num_used_accounts = Reader::at(SLAB, data, layout.num_used_off()).read_u16()?;
        engine.next_account_id = Reader::at(SLAB, data, layout.next_account_id_off()).read_u64()?;
        engine.free_head = Reader::at(SLAB, data, layout.free_head_off()).read_u16()?;
        Ok(engine)
    }

    fn parse_bitmap(data: &[u8], layout: &SlabLayout) -> Result<Vec<u64>, KeeperError> {
        let mut r = Reader::at(SLAB, data, layout.bitmap_off());
        (0..layout.bitmap_words()).map(|_| r.read_u64()).collect()
    }

    /// Indices whose bitmap bit is set, ascending. Slot bytes are never
    /// consulted: unused slots may hold stale data.
    pub fn parse_used_indices(data: &[u8], layout: &SlabLayout) -> Result<Vec<u16>, KeeperError> {
        let words = parse_bitmap(data, layout)?;
        Ok((0..layout.max_accounts())
            .filter(|&i| codec::bit_is_set(&words, i))
            .map(|i| i as u16)
            .collect())
    }

    /// `Ok(None)` for a slot whose bit is clear.
    pub fn parse_account(
        data: &[u8],
        layout: &SlabLayout,
        idx: u16,
    ) -> Result<Option<Account>, KeeperError> {
        let idx = idx as usize;
        if idx >= layout.max_accounts() {
            return Err(KeeperError::malformed(
                SLAB,
                format!("slot {idx} out of range for capacity {}", layout.max_accounts()),
            ));
        }
        let words = parse_bitmap(data, layout)?;
        if !codec::bit_is_set(&words, idx) {
            return Ok(None);
        }
        Account::read(&mut Reader::at(SLAB, data, layout.account_off(idx))).map(Some)
    }

    /// Fully decoded slab.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SlabAccount {
        pub layout: SlabLayout,
        pub header: SlabHeader,
        pub config: MarketConfig,
        pub engine: EngineState,
        /// Used slots only, ascending by index. Encoding rejects any other order.
        pub accounts: Vec<(u16, Account)>,
    }

    impl SlabAccount {
        pub fn decode(data: &[u8]) -> Result<Self, KeeperError> {
            let layout = SlabLayout::detect(data.len())?;
            Self::decode_with(data, layout)
        }

        pub fn decode_with(data: &[u8], layout: SlabLayout) -> Result<Self, KeeperError> {
            codec::require_len(SLAB, data, layout.slab_len())?;
            let header = parse_header(data)?;
            let config = parse_config(data)?;
            let engine = parse_engine(data, &layout)?;
            let accounts = parse_used_indices(data, &layout)?
                .into_iter()
                .map(|idx| {
                    Account::read(&mut Reader::at(SLAB, data, layout.account_off(idx as usize)))
                        .map(|acc| (idx, acc))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(SlabAccount {
                layout,
                header,
                config,
                engine,
                accounts,
            })
        }

        pub fn encode(&self) -> Result<Vec<u8>, KeeperError> {
            let mut data = vec![0u8; self.layout.slab_len()];
            self.encode_into(&mut data)?;
            Ok(data)
        }

        /// Writes every decoded field at its offset. Bytes outside the decoded
        /// fields (padding, the free list) are left untouched.
        pub fn encode_into(&self, data: &mut [u8]) -> Result<(), KeeperError> {
            let layout = self.layout;
            codec::require_len(SLAB, data, layout.slab_len())?;

            data[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&self.header.to_raw()));
            data[CONFIG_OFF..CONFIG_OFF + CONFIG_LEN]
                .copy_from_slice(bytemuck::bytes_of(&self.config.to_raw()));

            let e = &self.engine;
            let mut w = Writer::at(SLAB, data, ENGINE_OFF + ENG_VAULT);
            w.put_u128(e.vault)?;
            w.put_u128(e.insurance_fund.balance)?;
            w.put_u128(e.insurance_fund.fee_revenue)?;
            e.params.write(&mut w)?;
            w.put_u64(e.current_slot)?;
            w.put_i128(e.funding_index_qpb_e6)?;
            w.put_u64(e.last_funding_slot)?;
            w.put_i64(e.funding_rate_bps_per_slot_last)?;
            w.put_u64(e.last_crank_slot)?;
            w.put_u64(e.max_crank_staleness_slots)?;
            w.put_u128(e.total_open_interest)?;
            w.put_u128(e.c_tot)?;
            w.put_u128(e.pnl_pos_tot)?;
            w.put_u16(e.liq_cursor)?;
            w.put_u16(e.gc_cursor)?;
            w.skip(4)?;
            w.put_u64(e.last_full_sweep_start_slot)?;
            w.put_u64(e.last_full_sweep_completed_slot)?;
            w.put_u16(e.crank_cursor)?;
            w.put_u16(e.sweep_start_idx)?;
            w.skip(4)?;
            w.put_u64(e.lifetime_liquidations)?;
            w.put_u64(e.lifetime_force_realize_closes)?;
            w.put_i128(e.net_lp_pos)?;
            w.put_u128(e.lp_sum_abs)?;
            w.put_u128(e.lp_max_abs)?;
            w.put_u128(e.lp_max_abs_sweep)?;
            debug_assert_eq!(w.position(), layout.bitmap_off());

            let mut words = vec![0u64; layout.bitmap_words()];
            let mut prev: Option<usize> = None;
            for (idx, acc) in &self.accounts {
                let i = *idx as usize;
                if i >= layout.max_accounts() {
                    return Err(KeeperError::malformed(SLAB, format!("slot {i} out of range")));
                }
                if codec::bit_is_set(&words, i) {
                    return Err(KeeperError::malformed(SLAB, format!("slot {i} listed twice")));
                }
                // Decoding yields ascending slots; anything else would not round-trip.
                if prev.is_some_and(|p| i < p) {
                    let reason = format!("slot {i} listed out of order");
                    return Err(KeeperError::malformed(SLAB, reason));
                }
                prev = Some(i);
                // Owners sign deposits and withdrawals.
                if codec::is_zero_address(&acc.owner) {
                    let reason = format!("slot {i} owner is the zero address");
                    return Err(KeeperError::malformed(SLAB, reason));
                }
                words[i / 64] |= 1u64 << (i % 64);
                acc.write(&mut Writer::at(SLAB, data, layout.account_off(i)))?;
            }

            let mut w = Writer::at(SLAB, data, layout.bitmap_off());
            for word in &words {
                w.put_u64(*word)?;
            }
            Writer::at(SLAB, data, layout.num_used_off()).put_u16(e.num_used_accounts)?;
            Writer::at(SLAB, data, layout.next_account_id_off()).put_u64(e.next_account_id)?;
            Writer::at(SLAB, data, layout.free_head_off()).put_u16(e.free_head)?;
            Ok(())
        }

        pub fn account(&self, idx: u16) -> Option<&Account> {
            self.accounts.iter().find(|(i, _)| *i == idx).map(|(_, a)| a)
        }

        pub fn summary(&self) -> MarketSummary {
            let mut s = MarketSummary {
                admin: self.header.admin_status(),
                insurance: self.engine.insurance_fund,
                used_accounts: self.accounts.len(),
                ..MarketSummary::default()
            };
            for (_, acc) in &self.accounts {
                if acc.is_lp() {
                    s.lp_count += 1;
                } else {
                    s.user_count += 1;
                }
                s.open_interest = s.open_interest.saturating_add(acc.position_size.unsigned_abs());
            }
            s
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MarketSummary {
        pub admin: AdminStatus,
        pub insurance: InsuranceFund,
        pub used_accounts: usize,
        pub lp_count: usize,
        pub user_count: usize,
        /// Sum of |position| over used slots, in base units.
        pub open_interest: u128,
    }

    impl Default for MarketSummary {
        fn default() -> Self {
            MarketSummary {
                admin: AdminStatus::Renounced,
                insurance: InsuranceFund::default(),
                used_accounts: 0,
                lp_count: 0,
                user_count: 0,
                open_interest: 0,
            }
        }
    }
}

// 5. mod pool
pub mod pool {
    use crate::codec::{self, FieldSink, Reader};
    use crate::error::KeeperError;
    use solana_program::pubkey::Pubkey;

    pub const PUMPSWAP_PROGRAM_ID: Pubkey =
        solana_program::pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");
    pub const WSOL_MINT: Pubkey =
        solana_program::pubkey!("So11111111111111111111111111111111111111112");

    // PumpSwap pool layout (no Anchor discriminator)
    pub const POOL_MIN_LEN: usize = 203;
    pub const POOL_OFF_CREATOR: usize = 3;
    pub const POOL_OFF_BASE_MINT: usize = 35;
    pub const POOL_OFF_QUOTE_MINT: usize = 67;
    pub const POOL_OFF_LP_MINT: usize = 99;
    pub const POOL_OFF_BASE_VAULT: usize = 131;
    pub const POOL_OFF_QUOTE_VAULT: usize = 163;
    pub const POOL_OFF_LP_SUPPLY: usize = 195;
    pub const POOL_OFF_MAYHEM: usize = 203;

    const POOL: &str = "pool";

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct PoolAccount {
        pub pool_bump: u8,
        pub index: u16,
        pub creator: Pubkey,
        pub base_mint: Pubkey,
        pub quote_mint: Pubkey,
        pub lp_mint: Pubkey,
        pub pool_base_token_account: Pubkey,
        pub pool_quote_token_account: Pubkey,
        pub lp_supply: u64,
        /// Present only on records long enough to carry the flag.
        pub is_mayhem_mode: Option<bool>,
    }

    impl PoolAccount {
        pub fn decode(data: &[u8]) -> Result<Self, KeeperError> {
            codec::require_len(POOL, data, POOL_MIN_LEN)?;
            let mut r = Reader::new(POOL, data);
            let mut pool = PoolAccount {
                pool_bump: r.read_u8()?,
                index: r.read_u16()?,
                creator: r.read_pubkey()?,
                base_mint: r.read_pubkey()?,
                quote_mint: r.read_pubkey()?,
                lp_mint: r.read_pubkey()?,
                pool_base_token_account: r.read_pubkey()?,
                pool_quote_token_account: r.read_pubkey()?,
                lp_supply: r.read_u64()?,
                is_mayhem_mode: None,
            };
            if r.remaining() > 0 {
                pool.is_mayhem_mode = Some(r.read_u8()? != 0);
            }
            Ok(pool)
        }

        pub fn encode(&self) -> Vec<u8> {
            let mut out = Vec::with_capacity(POOL_MIN_LEN + 1);
            let mut w = PoolBytes(&mut out);
            // Writing into a Vec cannot fail.
            let _ = self.write(&mut w);
            out
        }

        fn write<S: FieldSink>(&self, w: &mut S) -> Result<(), KeeperError> {
            w.put_u8(self.pool_bump)?;
            w.put_u16(self.index)?;
            w.put_pubkey(&self.creator)?;
            w.put_pubkey(&self.base_mint)?;
            w.put_pubkey(&self.quote_mint)?;
            w.put_pubkey(&self.lp_mint)?;
            w.put_pubkey(&self.pool_base_token_account)?;
            w.put_pubkey(&self.pool_quote_token_account)?;
            w.put_u64(self.lp_supply)?;
            if let Some(flag) = self.is_mayhem_mode {
                w.put_u8(flag as u8)?;
            }
            Ok(())
        }
    }

    struct PoolBytes<'a>(&'a mut Vec<u8>);

    impl FieldSink for PoolBytes<'_> {
        fn put(&mut self, bytes: &[u8]) -> Result<(), KeeperError> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }
    }

    /// Seeds: ["pool", index (u16 le), creator, base mint, quote mint].
    pub fn derive_pool_address(
        index: u16,
        creator: &Pubkey,
        base_mint: &Pubkey,
        quote_mint: &Pubkey,
    ) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[
                b"pool",
                &index.to_le_bytes(),
                creator.as_ref(),
                base_mint.as_ref(),
                quote_mint.as_ref(),
            ],
            &PUMPSWAP_PROGRAM_ID,
        )
    }
}

// 6. mod units
pub mod units {
    use core::time::Duration;

    /// Exact decimal rendering of a fixed-point amount.
    pub fn format_amount(raw: u128, decimals: u8) -> String {
        if decimals == 0 {
            return raw.to_string();
        }
        let decimals = decimals.min(38) as u32;
        let scale = 10u128.pow(decimals);
        format!("{}.{:0width$}", raw / scale, raw % scale, width = decimals as usize)
    }

    pub fn format_signed(raw: i128, decimals: u8) -> String {
        let sign = if raw < 0 { "-" } else { "+" };
        format!("{sign}{}", format_amount(raw.unsigned_abs(), decimals))
    }

    pub fn format_bps(bps: u64) -> String {
        format!("{}.{:02}%", bps / 100, bps % 100)
    }

    pub fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        let mins = secs / 60;
        let hours = mins / 60;
        let days = hours / 24;
        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, mins % 60)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs % 60)
        } else {
            format!("{secs}s")
        }
    }
}

// 7. mod ix
pub mod ix {
    use crate::accounts::{self, AccountSpec};
    use crate::codec::{fit_u16, fit_u32, fit_u64, is_zero_address, FieldSink, Payload, Reader};
    use crate::constants::*;
    use crate::error::KeeperError;
    use crate::state::RiskParams;
    use crate::tags::*;
    use num_traits::FromPrimitive;
    use solana_program::instruction::Instruction as SolInstruction;
    use solana_program::pubkey::Pubkey;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct InitMarketArgs {
        pub admin: Pubkey,
        pub collateral_mint: Pubkey,
        /// All zeros selects authority pricing.
        pub index_feed_id: [u8; 32],
        pub max_staleness_secs: u64,
        pub conf_filter_bps: u32,
        pub invert: bool,
        pub unit_scale: u64,
        pub initial_mark_price_e6: u128,
        pub risk_params: RiskParams,
    }

    /// Typed call parameters. Amounts are carried wide and narrowed to their
    /// wire width at encode time.
    #[derive(Clone, Debug, PartialEq, Eq)]
    #[allow(clippy::large_enum_variant)]
    pub enum Instruction {
        InitMarket(InitMarketArgs),
        InitUser { fee_payment: u128 },
        InitLP { matcher_program: Pubkey, matcher_context: Pubkey, fee_payment: u128 },
        DepositCollateral { user_idx: u16, amount: u128 },
        WithdrawCollateral { user_idx: u16, amount: u128 },
        KeeperCrank { caller_idx: u16, allow_panic: bool },
        LiquidateAtOracle { target_idx: u16 },
        CloseAccount { user_idx: u16 },
        TopUpInsurance { amount: u128 },
        UpdateAdmin { new_admin: Pubkey },
        SetOracleAuthority { new_authority: Pubkey },
        PushOraclePrice { price_e6: u128, timestamp: i64 },
    }

    impl Instruction {
        pub fn tag(&self) -> u8 {
            match self {
                Instruction::InitMarket(_) => TAG_INIT_MARKET,
                Instruction::InitUser { .. } => TAG_INIT_USER,
                Instruction::InitLP { .. } => TAG_INIT_LP,
                Instruction::DepositCollateral { .. } => TAG_DEPOSIT_COLLATERAL,
                Instruction::WithdrawCollateral { .. } => TAG_WITHDRAW_COLLATERAL,
                Instruction::KeeperCrank { .. } => TAG_KEEPER_CRANK,
                Instruction::LiquidateAtOracle { .. } => TAG_LIQUIDATE_AT_ORACLE,
                Instruction::CloseAccount { .. } => TAG_CLOSE_ACCOUNT,
                Instruction::TopUpInsurance { .. } => TAG_TOP_UP_INSURANCE,
                Instruction::UpdateAdmin { .. } => TAG_UPDATE_ADMIN,
                Instruction::SetOracleAuthority { .. } => TAG_SET_ORACLE_AUTHORITY,
                Instruction::PushOraclePrice { .. } => TAG_PUSH_ORACLE_PRICE,
            }
        }

        pub fn name(&self) -> &'static str {
            match self {
                Instruction::InitMarket(_) => "InitMarket",
                Instruction::InitUser { .. } => "InitUser",
                Instruction::InitLP { .. } => "InitLP",
                Instruction::DepositCollateral { .. } => "DepositCollateral",
                Instruction::WithdrawCollateral { .. } => "WithdrawCollateral",
                Instruction::KeeperCrank { .. } => "KeeperCrank",
                Instruction::LiquidateAtOracle { .. } => "LiquidateAtOracle",
                Instruction::CloseAccount { .. } => "CloseAccount",
                Instruction::TopUpInsurance { .. } => "TopUpInsurance",
                Instruction::UpdateAdmin { .. } => "UpdateAdmin",
                Instruction::SetOracleAuthority { .. } => "SetOracleAuthority",
                Instruction::PushOraclePrice { .. } => "PushOraclePrice",
            }
        }

        pub fn accounts(&self) -> &'static [AccountSpec] {
            match self {
                Instruction::InitMarket(_) => accounts::ACCOUNTS_INIT_MARKET,
                Instruction::InitUser { .. } => accounts::ACCOUNTS_INIT_USER,
                Instruction::InitLP { .. } => accounts::ACCOUNTS_INIT_LP,
                Instruction::DepositCollateral { .. } => accounts::ACCOUNTS_DEPOSIT_COLLATERAL,
                Instruction::WithdrawCollateral { .. } => accounts::ACCOUNTS_WITHDRAW_COLLATERAL,
                Instruction::KeeperCrank { .. } => accounts::ACCOUNTS_KEEPER_CRANK,
                Instruction::LiquidateAtOracle { .. } => accounts::ACCOUNTS_LIQUIDATE_AT_ORACLE,
                Instruction::CloseAccount { .. } => accounts::ACCOUNTS_CLOSE_ACCOUNT,
                Instruction::TopUpInsurance { .. } => accounts::ACCOUNTS_TOPUP_INSURANCE,
                Instruction::UpdateAdmin { .. }
                | Instruction::SetOracleAuthority { .. }
                | Instruction::PushOraclePrice { .. } => accounts::ACCOUNTS_AUTHORITY,
            }
        }

        pub fn compute_units(&self) -> u32 {
            match self {
                Instruction::InitMarket(_) => CU_INIT_MARKET,
                Instruction::KeeperCrank { .. } | Instruction::LiquidateAtOracle { .. } => CU_CRANK,
                Instruction::PushOraclePrice { .. } => CU_PUSH_PRICE,
                Instruction::UpdateAdmin { .. } | Instruction::SetOracleAuthority { .. } => {
                    CU_ADMIN
                }
                _ => CU_DEPOSIT,
            }
        }

        pub fn encode(&self) -> Result<Vec<u8>, KeeperError> {
            let mut p = Payload::new(self.tag());
            match self {
                Instruction::InitMarket(a) => {
                    if is_zero_address(&a.admin) {
                        return Err(KeeperError::malformed(
                            "instruction",
                            "InitMarket admin signs the transaction and cannot be the zero address",
                        ));
                    }
                    p.put_pubkey(&a.admin)?;
                    p.put_pubkey(&a.collateral_mint)?;
                    p.put(&a.index_feed_id)?;
                    p.put_u64(a.max_staleness_secs)?;
                    p.put_u16(fit_u16("conf_filter_bps", a.conf_filter_bps as u128)?)?;
                    p.put_u8(a.invert as u8)?;
                    p.put_u32(fit_u32("unit_scale", a.unit_scale as u128)?)?;
                    p.put_u64(fit_u64("initial_mark_price_e6", a.initial_mark_price_e6)?)?;
                    a.risk_params.write(&mut p)?;
                }
                Instruction::InitUser { fee_payment } => {
                    p.put_u64(fit_u64("fee_payment", *fee_payment)?)?;
                }
                Instruction::InitLP { matcher_program, matcher_context, fee_payment } => {
                    p.put_pubkey(matcher_program)?;
                    p.put_pubkey(matcher_context)?;
                    p.put_u64(fit_u64("fee_payment", *fee_payment)?)?;
                }
                Instruction::DepositCollateral { user_idx, amount }
                | Instruction::WithdrawCollateral { user_idx, amount } => {
                    p.put_u16(*user_idx)?;
                    p.put_u64(fit_u64("amount", *amount)?)?;
                }
                Instruction::KeeperCrank { caller_idx, allow_panic } => {
                    p.put_u16(*caller_idx)?;
                    p.put_u8(*allow_panic as u8)?;
                }
                Instruction::LiquidateAtOracle { target_idx } => p.put_u16(*target_idx)?,
                Instruction::CloseAccount { user_idx } => p.put_u16(*user_idx)?,
                Instruction::TopUpInsurance { amount } => {
                    p.put_u64(fit_u64("amount", *amount)?)?;
                }
                Instruction::UpdateAdmin { new_admin } => p.put_pubkey(new_admin)?,
                Instruction::SetOracleAuthority { new_authority } => p.put_pubkey(new_authority)?,
                Instruction::PushOraclePrice { price_e6, timestamp } => {
                    p.put_u64(fit_u64("price_e6", *price_e6)?)?;
                    p.put_i64(*timestamp)?;
                }
            }
            Ok(p.into_bytes())
        }

        pub fn decode(input: &[u8]) -> Result<Self, KeeperError> {
            let mut r = Reader::new("instruction", input);
            let tag = r.read_u8()?;
            let kind = InstructionTag::from_u8(tag)
                .ok_or_else(|| {
                    KeeperError::malformed("instruction", format!("unknown tag {tag}"))
                })?;
            let ix = match kind {
                InstructionTag::InitMarket => Instruction::InitMarket(InitMarketArgs {
                    admin: r.read_pubkey()?,
                    collateral_mint: r.read_pubkey()?,
                    index_feed_id: r.read_bytes32()?,
                    max_staleness_secs: r.read_u64()?,
                    conf_filter_bps: r.read_u16()? as u32,
                    invert: r.read_u8()? != 0,
                    unit_scale: r.read_u32()? as u64,
                    initial_mark_price_e6: r.read_u64()? as u128,
                    risk_params: RiskParams::read(&mut r)?,
                }),
                InstructionTag::InitUser => Instruction::InitUser {
                    fee_payment: r.read_u64()? as u128,
                },
                InstructionTag::InitLP => Instruction::InitLP {
                    matcher_program: r.read_pubkey()?,
                    matcher_context: r.read_pubkey()?,
                    fee_payment: r.read_u64()? as u128,
                },
                InstructionTag::DepositCollateral => Instruction::DepositCollateral {
                    user_idx: r.read_u16()?,
                    amount: r.read_u64()? as u128,
                },
                InstructionTag::WithdrawCollateral => Instruction::WithdrawCollateral {
                    user_idx: r.read_u16()?,
                    amount: r.read_u64()? as u128,
                },
                InstructionTag::KeeperCrank => Instruction::KeeperCrank {
                    caller_idx: r.read_u16()?,
                    allow_panic: r.read_u8()? != 0,
                },
                InstructionTag::LiquidateAtOracle => Instruction::LiquidateAtOracle {
                    target_idx: r.read_u16()?,
                },
                InstructionTag::CloseAccount => Instruction::CloseAccount {
                    user_idx: r.read_u16()?,
                },
                InstructionTag::TopUpInsurance => Instruction::TopUpInsurance {
                    amount: r.read_u64()? as u128,
                },
                InstructionTag::UpdateAdmin => Instruction::UpdateAdmin {
                    new_admin: r.read_pubkey()?,
                },
                InstructionTag::SetOracleAuthority => Instruction::SetOracleAuthority {
                    new_authority: r.read_pubkey()?,
                },
                InstructionTag::PushOraclePrice => Instruction::PushOraclePrice {
                    price_e6: r.read_u64()? as u128,
                    timestamp: r.read_i64()?,
                },
            };
            if r.remaining() != 0 {
                return Err(KeeperError::malformed(
                    "instruction",
                    format!("{} trailing bytes after {}", r.remaining(), ix.name()),
                ));
            }
            Ok(ix)
        }

        /// Encodes the payload and pairs it with `keys` in the order the
        /// program expects for this operation.
        pub fn build(
            &self,
            program_id: &Pubkey,
            keys: &[Pubkey],
        ) -> Result<SolInstruction, KeeperError> {
            let metas = accounts::build_account_metas(self.name(), self.accounts(), keys)?;
            Ok(SolInstruction {
                program_id: *program_id,
                accounts: metas,
                data: self.encode()?,
            })
        }
    }

    /// Permissionless crank. Authority-priced markets pass the slab as the
    /// oracle account.
    pub fn keeper_crank(
        program_id: &Pubkey,
        caller: &Pubkey,
        slab: &Pubkey,
        oracle: &Pubkey,
    ) -> Result<SolInstruction, KeeperError> {
        Instruction::KeeperCrank {
            caller_idx: CRANK_NO_CALLER,
            allow_panic: false,
        }
        .build(program_id, &[*caller, *slab, accounts::CLOCK_SYSVAR, *oracle])
    }

    pub fn push_oracle_price(
        program_id: &Pubkey,
        authority: &Pubkey,
        slab: &Pubkey,
        price_e6: u128,
        timestamp: i64,
    ) -> Result<SolInstruction, KeeperError> {
        Instruction::PushOraclePrice { price_e6, timestamp }.build(program_id, &[*authority, *slab])
    }

    /// Disables the oracle authority, then hands admin to the zero address.
    /// The order matters: once admin is gone nothing can clear the authority.
    pub fn renounce_admin(
        program_id: &Pubkey,
        admin: &Pubkey,
        slab: &Pubkey,
    ) -> Result<Vec<SolInstruction>, KeeperError> {
        Ok(vec![
            Instruction::SetOracleAuthority {
                new_authority: Pubkey::default(),
            }
            .build(program_id, &[*admin, *slab])?,
            Instruction::UpdateAdmin {
                new_admin: Pubkey::default(),
            }
            .build(program_id, &[*admin, *slab])?,
        ])
    }
}

// 8. mod accounts
pub mod accounts {
    use crate::error::KeeperError;
    use solana_program::{instruction::AccountMeta, pubkey::Pubkey};

    pub const CLOCK_SYSVAR: Pubkey = solana_program::sysvar::clock::ID;
    pub const RENT_SYSVAR: Pubkey = solana_program::sysvar::rent::ID;
    pub const SYSTEM_PROGRAM: Pubkey = solana_program::system_program::ID;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccountSpec {
        pub name: &'static str,
        pub signer: bool,
        pub writable: bool,
    }

    const fn spec(name: &'static str, signer: bool, writable: bool) -> AccountSpec {
        AccountSpec { name, signer, writable }
    }

    pub const ACCOUNTS_INIT_MARKET: &[AccountSpec] = &[
        spec("admin", true, true),
        spec("slab", false, true),
        spec("mint", false, false),
        spec("vault", false, false),
        spec("tokenProgram", false, false),
        spec("clock", false, false),
        spec("rent", false, false),
        spec("vaultAuthority", false, false),
        spec("systemProgram", false, false),
    ];

    pub const ACCOUNTS_INIT_USER: &[AccountSpec] = &[
        spec("user", true, true),
        spec("slab", false, true),
        spec("userAta", false, true),
        spec("vault", false, true),
        spec("tokenProgram", false, false),
    ];

    pub const ACCOUNTS_INIT_LP: &[AccountSpec] = ACCOUNTS_INIT_USER;

    pub const ACCOUNTS_TOPUP_INSURANCE: &[AccountSpec] = ACCOUNTS_INIT_USER;

    pub const ACCOUNTS_DEPOSIT_COLLATERAL: &[AccountSpec] = &[
        spec("user", true, true),
        spec("slab", false, true),
        spec("userAta", false, true),
        spec("vault", false, true),
        spec("tokenProgram", false, false),
        spec("clock", false, false),
    ];

    pub const ACCOUNTS_WITHDRAW_COLLATERAL: &[AccountSpec] = &[
        spec("user", true, false),
        spec("slab", false, true),
        spec("vault", false, true),
        spec("userAta", false, true),
        spec("vaultAuthority", false, false),
        spec("tokenProgram", false, false),
        spec("clock", false, false),
        spec("oracle", false, false),
    ];

    pub const ACCOUNTS_CLOSE_ACCOUNT: &[AccountSpec] = ACCOUNTS_WITHDRAW_COLLATERAL;

    pub const ACCOUNTS_KEEPER_CRANK: &[AccountSpec] = &[
        spec("caller", true, false),
        spec("slab", false, true),
        spec("clock", false, false),
        spec("oracle", false, false),
    ];

    pub const ACCOUNTS_LIQUIDATE_AT_ORACLE: &[AccountSpec] = ACCOUNTS_KEEPER_CRANK;

    /// UpdateAdmin, SetOracleAuthority and PushOraclePrice.
    pub const ACCOUNTS_AUTHORITY: &[AccountSpec] =
        &[spec("authority", true, false), spec("slab", false, true)];

    pub fn build_account_metas(
        instruction: &'static str,
        specs: &[AccountSpec],
        keys: &[Pubkey],
    ) -> Result<Vec<AccountMeta>, KeeperError> {
        if specs.len() != keys.len() {
            return Err(KeeperError::AccountListMismatch {
                instruction,
                expected: specs.len(),
                got: keys.len(),
            });
        }
        Ok(specs
            .iter()
            .zip(keys)
            .map(|(s, key)| {
                if s.writable {
                    AccountMeta::new(*key, s.signer)
                } else {
                    AccountMeta::new_readonly(*key, s.signer)
                }
            })
            .collect())
    }

    pub fn derive_vault_authority(program_id: &Pubkey, slab_key: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"vault", slab_key.as_ref()], program_id)
    }

    pub fn derive_lp_pda(program_id: &Pubkey, slab_key: &Pubkey, lp_idx: u16) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"lp", slab_key.as_ref(), &lp_idx.to_le_bytes()], program_id)
    }
}
