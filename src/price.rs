//! Spot price from a PumpSwap pool.
//!
//! The pool record only points at its two token accounts; the reserves are the
//! SPL balances held there. Prices are produced both as `f64` for display and as
//! an integer scaled by 1e6, which is what the program consumes.

use crate::constants::PRICE_SCALE;
use crate::error::{map_program_error, KeeperError};
use crate::pool::PoolAccount;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use solana_program::{program_pack::Pack, pubkey::Pubkey};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Read access to raw account bytes.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn account_data(&self, key: &Pubkey) -> Result<Vec<u8>, KeeperError>;
}

#[async_trait]
impl<T: AccountSource + ?Sized> AccountSource for Arc<T> {
    async fn account_data(&self, key: &Pubkey) -> Result<Vec<u8>, KeeperError> {
        (**self).account_data(key).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolPrice {
    pub price: f64,
    pub price_e6: u128,
    pub base_reserve: u64,
    pub quote_reserve: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothedPrice {
    pub price: f64,
    pub price_e6: u128,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceSample {
    pub price: f64,
    pub price_e6: u128,
    pub timestamp: i64,
}

fn pow10(field: &'static str, exp: u32) -> Result<u128, KeeperError> {
    10u128
        .checked_pow(exp)
        .ok_or_else(|| KeeperError::overflow(field, format!("10^{exp}"), "u128"))
}

/// `quote * 1e6 * 10^(bd - qd) / base`, with the decimal gap moved to the
/// denominator when the quote side has more decimals. Zero base reserve means
/// no liquidity and yields 0.
pub fn compute_price_e6(
    base: u64,
    quote: u64,
    base_decimals: u8,
    quote_decimals: u8,
) -> Result<u128, KeeperError> {
    if base == 0 {
        return Ok(0);
    }
    let up = pow10("price_e6", base_decimals.saturating_sub(quote_decimals) as u32)?;
    let down = pow10("price_e6", quote_decimals.saturating_sub(base_decimals) as u32)?;

    let numerator = (quote as u128)
        .checked_mul(PRICE_SCALE)
        .and_then(|v| v.checked_mul(up))
        .ok_or_else(|| KeeperError::overflow("price_e6", format!("{quote} * 1e6 * {up}"), "u128"))?;
    let denominator = (base as u128)
        .checked_mul(down)
        .ok_or_else(|| KeeperError::overflow("price_e6", format!("{base} * {down}"), "u128"))?;
    Ok(numerator / denominator)
}

pub fn price_from_e6(price_e6: u128) -> f64 {
    price_e6 as f64 / PRICE_SCALE as f64
}

/// SPL token balance. Token-2022 records carry extensions past the base layout.
pub fn token_amount(account: &'static str, data: &[u8]) -> Result<u64, KeeperError> {
    let len = spl_token::state::Account::LEN;
    let base = data
        .get(..len)
        .ok_or_else(|| KeeperError::truncated(account, len, data.len()))?;
    spl_token::state::Account::unpack(base)
        .map(|acc| acc.amount)
        .map_err(|e| map_program_error(account, e))
}

pub fn resolve_price(
    pool_data: &[u8],
    base_token_data: &[u8],
    quote_token_data: &[u8],
    base_decimals: u8,
    quote_decimals: u8,
) -> Result<PoolPrice, KeeperError> {
    PoolAccount::decode(pool_data)?;
    let base_reserve = token_amount("base token", base_token_data)?;
    let quote_reserve = token_amount("quote token", quote_token_data)?;
    let price_e6 = compute_price_e6(base_reserve, quote_reserve, base_decimals, quote_decimals)?;
    Ok(PoolPrice {
        price: price_from_e6(price_e6),
        price_e6,
        base_reserve,
        quote_reserve,
    })
}

pub async fn fetch_pool_price<S: AccountSource + ?Sized>(
    source: &S,
    pool: &Pubkey,
    base_decimals: u8,
    quote_decimals: u8,
) -> Result<PoolPrice, KeeperError> {
    let pool_data = source.account_data(pool).await?;
    let decoded = PoolAccount::decode(&pool_data)?;
    let base = source.account_data(&decoded.pool_base_token_account).await?;
    let quote = source.account_data(&decoded.pool_quote_token_account).await?;
    resolve_price(&pool_data, &base, &quote, base_decimals, quote_decimals)
}

/// Mean of `samples` reads spaced `delay` apart. The first failed read aborts.
pub async fn smoothed_price<S: AccountSource + ?Sized>(
    source: &S,
    pool: &Pubkey,
    base_decimals: u8,
    quote_decimals: u8,
    samples: usize,
    delay: Duration,
) -> Result<SmoothedPrice, KeeperError> {
    if samples == 0 {
        return Err(KeeperError::Config("smoothing needs at least one sample".into()));
    }
    let mut prices = Vec::with_capacity(samples);
    for i in 0..samples {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        prices.push(fetch_pool_price(source, pool, base_decimals, quote_decimals).await?);
    }

    let sum_e6: u128 = prices.iter().map(|p| p.price_e6).fold(0u128, u128::saturating_add);
    let sum: f64 = prices.iter().map(|p| p.price).sum();
    let min = prices.iter().map(|p| p.price).fold(f64::INFINITY, f64::min);
    let max = prices.iter().map(|p| p.price).fold(f64::NEG_INFINITY, f64::max);
    Ok(SmoothedPrice {
        price: sum / samples as f64,
        price_e6: sum_e6 / samples as u128,
        min,
        max,
        samples,
    })
}

/// Endless price samples, one per `interval`. A failed read is logged and the
/// stream waits for the next tick instead of ending.
pub fn monitor<'a, S: AccountSource + ?Sized>(
    source: &'a S,
    pool: Pubkey,
    base_decimals: u8,
    quote_decimals: u8,
    interval: Duration,
) -> impl Stream<Item = PriceSample> + 'a {
    stream::unfold(true, move |first| async move {
        if !first {
            tokio::time::sleep(interval).await;
        }
        loop {
            match fetch_pool_price(source, &pool, base_decimals, quote_decimals).await {
                Ok(p) => {
                    let sample = PriceSample {
                        price: p.price,
                        price_e6: p.price_e6,
                        timestamp: unix_now(),
                    };
                    return Some((sample, false));
                }
                Err(e) => {
                    warn!(pool = %pool, error = %e, "price sample failed");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    })
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_decimals() {
        assert_eq!(compute_price_e6(1_000_000_000, 50_000, 9, 9).unwrap(), 50);
    }

    #[test]
    fn base_has_more_decimals() {
        // 1 base token (6 dp) against 2 quote tokens (3 dp).
        assert_eq!(compute_price_e6(1_000_000, 2_000, 6, 3).unwrap(), 2_000_000);
    }

    #[test]
    fn quote_has_more_decimals() {
        // 1 token at 6 dp priced at 0.5 SOL (9 dp).
        assert_eq!(compute_price_e6(1_000_000, 500_000_000, 6, 9).unwrap(), 500_000);
    }

    #[test]
    fn empty_pool_is_zero() {
        assert_eq!(compute_price_e6(0, 123, 9, 9).unwrap(), 0);
    }

    #[test]
    fn absurd_decimal_gap_overflows() {
        let err = compute_price_e6(1, u64::MAX, 60, 0).unwrap_err();
        assert!(err.is_overflow());
    }
}
