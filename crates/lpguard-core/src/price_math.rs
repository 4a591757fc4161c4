//! Conversions between raw pool prices, ticks and human-scaled prices.
//!
//! Raw prices are squared and rescaled in 512-bit integer space, then divided
//! once into a `BigDecimal` at [`PRECISION`] significant digits. The decimal
//! correction `10^(decimals_base - decimals_quote)` is applied to the integer
//! ratio, so no step collapses precision anywhere on the tick grid.
//!
//! [`PRECISION`]: crate::decimal::PRECISION

use alloy::primitives::{Uint, U256};
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;

use crate::decimal::Price;
use crate::error::{MathError, MathResult};
use crate::tick_math::{sqrt_ratio_at_tick, MAX_TICK, MIN_TICK};

pub(crate) type U512 = Uint<512, 8>;

/// Largest decimal-count difference accepted between two tokens.
pub const MAX_DECIMALS_DIFF: u32 = 36;

/// Q64.96 squared: the fixed-point scale of `sqrt_price_x96^2`.
const Q192_SHIFT: usize = 192;

pub(crate) fn pow10(exp: u32) -> U512 {
    let ten = U512::from(10u8);
    let mut value = U512::from(1u8);
    for _ in 0..exp {
        value *= ten;
    }
    value
}

pub(crate) fn uint_to_big(value: U512) -> BigDecimal {
    let digits = BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes_vec());
    BigDecimal::new(digits, 0)
}

/// The rational `num / den` as a `BigDecimal`.
pub(crate) fn ratio_to_big(num: U512, den: U512) -> MathResult<BigDecimal> {
    if den.is_zero() {
        return Err(MathError::DivisionByZero("ratio denominator"));
    }
    Ok(uint_to_big(num) / uint_to_big(den))
}

/// `(sqrt_price_x96^2 * 10^diff, 2^192)`, with a negative `diff` moved to the
/// denominator.
fn price_ratio(
    sqrt_price_x96: U256,
    decimals_base: u8,
    decimals_quote: u8,
) -> MathResult<(U512, U512)> {
    if sqrt_price_x96.is_zero() {
        return Err(MathError::InvalidInput("zero sqrt price".to_string()));
    }

    let diff = i32::from(decimals_base) - i32::from(decimals_quote);
    if diff.unsigned_abs() > MAX_DECIMALS_DIFF {
        return Err(MathError::InvalidInput(format!(
            "decimals difference {diff} out of range"
        )));
    }

    let sqrt = U512::from(sqrt_price_x96);
    let mut num = sqrt * sqrt;
    let mut den = U512::from(1u8) << Q192_SHIFT;
    if diff >= 0 {
        num *= pow10(diff.unsigned_abs());
    } else {
        den *= pow10(diff.unsigned_abs());
    }
    Ok((num, den))
}

/// Human price (quote per base) from a Q64.96 square-root price.
///
/// `decimals_base` belongs to the token the price is denominated *in units of*
/// (pool `token0`), `decimals_quote` to the token it is quoted in (`token1`).
/// A positive sqrt price always yields a positive price.
pub fn price_from_sqrt(
    sqrt_price_x96: U256,
    decimals_base: u8,
    decimals_quote: u8,
) -> MathResult<Price> {
    let (num, den) = price_ratio(sqrt_price_x96, decimals_base, decimals_quote)?;
    ratio_to_big(num, den).map(Price::from_big)
}

/// Human price at `tick`: `1.0001^tick * 10^(decimals_base - decimals_quote)`.
pub fn price_from_tick(tick: i32, decimals_base: u8, decimals_quote: u8) -> MathResult<Price> {
    let sqrt = sqrt_ratio_at_tick(tick)?;
    price_from_sqrt(sqrt, decimals_base, decimals_quote)
}

/// Reciprocal price.
pub fn invert(price: &Price) -> MathResult<Price> {
    price.invert()
}

/// Greatest tick whose price does not exceed `price`.
///
/// Starts from a `log_1.0001` estimate and walks the exact tick grid to
/// correct it, so `tick_from_price(price_from_tick(t)) == t` for every tick in
/// `[MIN_TICK, MAX_TICK]`. Prices off the grid clamp to the nearest bound.
pub fn tick_from_price(price: &Price, decimals_base: u8, decimals_quote: u8) -> MathResult<i32> {
    if !price.is_positive() {
        return Err(MathError::InvalidInput(format!(
            "price must be positive, got {price}"
        )));
    }

    let human = price
        .to_f64()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or(MathError::Overflow("price to f64"))?;
    let diff = f64::from(i32::from(decimals_base) - i32::from(decimals_quote));
    let raw_ln = human.ln() - diff * std::f64::consts::LN_10;
    let estimate = (raw_ln / 1.0001_f64.ln()).floor();
    let mut tick = estimate.clamp(f64::from(MIN_TICK), f64::from(MAX_TICK)) as i32;

    while tick > MIN_TICK && price_from_tick(tick, decimals_base, decimals_quote)? > *price {
        tick -= 1;
    }
    while tick < MAX_TICK && price_from_tick(tick + 1, decimals_base, decimals_quote)? <= *price {
        tick += 1;
    }
    Ok(tick)
}
