//! Deterministic fuzzing of the decoders: hostile or truncated account bytes
//! must produce errors, never panics.

use percolator_keeper::{
    constants::{ENGINE_OFF, HEADER_LEN, MAGIC, VERSION},
    ix::Instruction,
    pool::{PoolAccount, POOL_MIN_LEN},
    state::{
        self, Account, AccountKind, EngineState, InsuranceFund, MarketConfig, RiskParams,
        SlabAccount, SlabHeader, SlabLayout,
    },
};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use solana_program::pubkey::Pubkey;

fn random_slab(rng: &mut XorShiftRng, layout: SlabLayout) -> SlabAccount {
    let mut used: Vec<u16> = (0..layout.max_accounts() as u16)
        .filter(|_| rng.gen_bool(0.1))
        .collect();
    used.dedup();
    SlabAccount {
        layout,
        header: SlabHeader {
            magic: MAGIC,
            version: VERSION,
            bump: rng.gen(),
            flags: rng.gen_range(0..4),
            admin: Pubkey::new_from_array(rng.gen()),
            oracle_authority: Pubkey::new_from_array(rng.gen()),
            req_nonce: rng.gen(),
            last_thr_update_slot: rng.gen(),
        },
        config: MarketConfig {
            collateral_mint: Pubkey::new_from_array(rng.gen()),
            vault: Pubkey::new_from_array(rng.gen()),
            index_feed_id: rng.gen(),
            max_staleness_secs: rng.gen(),
            conf_filter_bps: rng.gen(),
            vault_authority_bump: rng.gen(),
            invert: rng.gen_range(0..2),
            unit_scale: rng.gen(),
            authority_price_e6: rng.gen(),
            authority_timestamp: rng.gen(),
            oracle_price_cap_e2bps: rng.gen(),
            last_effective_price_e6: rng.gen(),
        },
        engine: EngineState {
            vault: rng.gen(),
            insurance_fund: InsuranceFund {
                balance: rng.gen(),
                fee_revenue: rng.gen(),
            },
            params: RiskParams {
                warmup_period_slots: rng.gen(),
                max_accounts: layout.max_accounts() as u64,
                new_account_fee: rng.gen(),
                liquidation_fee_cap: rng.gen(),
                ..RiskParams::default()
            },
            current_slot: rng.gen(),
            funding_index_qpb_e6: rng.gen(),
            net_lp_pos: rng.gen(),
            liq_cursor: rng.gen(),
            crank_cursor: rng.gen(),
            lp_max_abs: rng.gen(),
            lp_max_abs_sweep: rng.gen(),
            num_used_accounts: used.len() as u16,
            next_account_id: rng.gen(),
            free_head: rng.gen(),
            ..EngineState::default()
        },
        accounts: used
            .into_iter()
            .map(|idx| {
                let acc = Account {
                    account_id: rng.gen(),
                    capital: rng.gen(),
                    kind: if rng.gen_bool(0.2) { AccountKind::LP } else { AccountKind::User },
                    pnl: rng.gen(),
                    reserved_pnl: rng.gen(),
                    warmup_started_at_slot: rng.gen(),
                    warmup_slope_per_step: rng.gen(),
                    position_size: rng.gen(),
                    entry_price: rng.gen(),
                    funding_index: rng.gen(),
                    matcher_program: Pubkey::new_from_array(rng.gen()),
                    matcher_context: Pubkey::new_from_array(rng.gen()),
                    owner: Pubkey::new_from_array([idx as u8 | 1; 32]),
                    fee_credits: rng.gen(),
                    last_fee_slot: rng.gen(),
                };
                (idx, acc)
            })
            .collect(),
    }
}

#[test]
fn deterministic_slab_roundtrip() {
    let mut rng = XorShiftRng::from_seed([0xabu8; 16]);
    for _ in 0..40 {
        let layout = SlabLayout::new([64, 256][rng.gen_range(0..2)]);
        let slab = random_slab(&mut rng, layout);
        let bytes = slab.encode().unwrap();
        assert_eq!(SlabAccount::decode(&bytes).unwrap(), slab);
    }
}

#[test]
fn truncated_slab_never_panics() {
    let mut rng = XorShiftRng::from_seed([0x11u8; 16]);
    let layout = SlabLayout::new(64);
    let bytes = random_slab(&mut rng, layout).encode().unwrap();

    for _ in 0..500 {
        let cut = rng.gen_range(0..bytes.len());
        let data = &bytes[..cut];
        assert!(SlabAccount::decode(data).is_err());
        assert!(SlabAccount::decode_with(data, layout).is_err());

        let _ = state::parse_header(data);
        let _ = state::parse_config(data);
        let _ = state::parse_params(data);
        let _ = state::parse_insurance(data);
        let _ = state::parse_engine(data, &layout);
        let _ = state::parse_used_indices(data, &layout);
        let _ = state::parse_account(data, &layout, rng.gen_range(0..64));

        if cut < HEADER_LEN {
            assert!(state::parse_header(data).is_err());
        }
        if cut >= ENGINE_OFF + 48 {
            assert!(state::parse_insurance(data).is_ok());
        }
    }
}

#[test]
fn corrupted_slab_never_panics() {
    let mut rng = XorShiftRng::from_seed([0x5au8; 16]);
    let layout = SlabLayout::new(64);
    let clean = random_slab(&mut rng, layout).encode().unwrap();

    for _ in 0..300 {
        let mut bytes = clean.clone();
        for _ in 0..rng.gen_range(1..64) {
            // Leave magic and version alone so decoding gets past the header.
            let at = rng.gen_range(HEADER_LEN..bytes.len());
            bytes[at] = rng.gen();
        }
        if let Ok(slab) = SlabAccount::decode(&bytes) {
            for (idx, acc) in &slab.accounts {
                assert!((*idx as usize) < layout.max_accounts());
                assert!(matches!(acc.kind, AccountKind::User | AccountKind::LP));
            }
        }
    }
}

#[test]
fn random_buffers_never_panic() {
    let mut rng = XorShiftRng::from_seed([0x77u8; 16]);
    let lengths = [0, 1, 95, 96, 239, 240, 648, SlabLayout::new(64).slab_len()];
    for &len in &lengths {
        for _ in 0..20 {
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let _ = SlabAccount::decode(&data);
            let _ = PoolAccount::decode(&data);
        }
    }
}

#[test]
fn pool_decode_depends_only_on_length() {
    let mut rng = XorShiftRng::from_seed([0x33u8; 16]);
    for _ in 0..300 {
        let len = rng.gen_range(0..260);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let decoded = PoolAccount::decode(&data);
        assert_eq!(decoded.is_ok(), len >= POOL_MIN_LEN, "len {len}");
        if let Ok(pool) = decoded {
            assert_eq!(pool.is_mayhem_mode.is_some(), len > POOL_MIN_LEN);
        }
    }
}

#[test]
fn random_instruction_bytes_never_panic() {
    let mut rng = XorShiftRng::from_seed([0x99u8; 16]);
    for _ in 0..2000 {
        let len = rng.gen_range(0..300);
        let mut data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        if let Some(first) = data.first_mut() {
            *first = rng.gen_range(0..20);
        }
        if let Ok(ix) = Instruction::decode(&data) {
            // Zero admins are refused on the encode side only.
            if let Ok(bytes) = ix.encode() {
                assert_eq!(Instruction::decode(&bytes).unwrap(), ix);
            }
        }
    }
}
