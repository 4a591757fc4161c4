//! Token reserves held by a concentrated-liquidity position.
//!
//! The pool price is clamped into the position's range before applying the
//! liquidity formulas, so an out-of-range position reports 100% of one asset:
//!
//! ```text
//! amount0 = L * (sqrt_upper - sqrt_p) / (sqrt_p * sqrt_upper)
//! amount1 = L * (sqrt_p - sqrt_lower)
//! ```
//!
//! All arithmetic runs on the exact Q64.96 grid before scaling by
//! `10^-decimals`.

use alloy::primitives::U256;

use crate::decimal::Amount;
use crate::error::{MathError, MathResult};
use crate::price_math::{pow10, ratio_to_big, U512, MAX_DECIMALS_DIFF};
use crate::tick_math::sqrt_ratio_at_tick;
use crate::types::DerivedBalances;

const Q96_SHIFT: usize = 96;

/// Derive both token balances of a position.
pub fn derive_balances(
    liquidity: u128,
    sqrt_price_x96: U256,
    tick_lower: i32,
    tick_upper: i32,
    decimals0: u8,
    decimals1: u8,
) -> MathResult<DerivedBalances> {
    if tick_lower >= tick_upper {
        return Err(MathError::InvalidInput(format!(
            "empty tick range [{tick_lower}, {tick_upper})"
        )));
    }
    if u32::from(decimals0.max(decimals1)) > MAX_DECIMALS_DIFF {
        return Err(MathError::InvalidInput(format!(
            "token decimals out of range: {decimals0}/{decimals1}"
        )));
    }

    let sqrt_lower = sqrt_ratio_at_tick(tick_lower)?;
    let sqrt_upper = sqrt_ratio_at_tick(tick_upper)?;
    let sqrt_p = sqrt_price_x96.clamp(sqrt_lower, sqrt_upper);

    let liquidity = U512::from(liquidity);
    let sqrt_lower = U512::from(sqrt_lower);
    let sqrt_upper = U512::from(sqrt_upper);
    let sqrt_p = U512::from(sqrt_p);

    let amount0 = ratio_to_big(
        (liquidity << Q96_SHIFT) * (sqrt_upper - sqrt_p),
        sqrt_p * sqrt_upper * pow10(u32::from(decimals0)),
    )?;
    let amount1 = ratio_to_big(
        liquidity * (sqrt_p - sqrt_lower),
        (U512::from(1u8) << Q96_SHIFT) * pow10(u32::from(decimals1)),
    )?;

    Ok(DerivedBalances {
        token0: Amount::from_big(amount0),
        token1: Amount::from_big(amount1),
    })
}
