//! Impermanent loss of a concentrated-liquidity range versus holding.
//!
//! Closed-form range-position loss ratio:
//!
//! ```text
//! k    = p_new / p_old
//! loss = (2*sqrt(k) - 1 - k) / (1 + k - sqrt(lower / p_old) - k * sqrt(p_old / upper))
//! ```
//!
//! The ratio is `<= 0` for realistic inputs; `0` means no loss. Evaluating
//! from the top of the range (`p_old == upper`) is what the dump band uses.

use bigdecimal::{BigDecimal, One, Zero};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::decimal::{decimal_to_big, round_to_precision, Price, PRECISION};
use crate::error::{MathError, MathResult};

fn checked_sqrt(value: &BigDecimal, what: &'static str) -> MathResult<BigDecimal> {
    if *value < BigDecimal::zero() {
        return Err(MathError::NegativeSqrt(what));
    }
    if value.is_zero() || value.is_one() {
        return Ok(value.clone());
    }
    value.sqrt().ok_or(MathError::NegativeSqrt(what))
}

fn checked_ratio(
    num: &BigDecimal,
    den: &BigDecimal,
    what: &'static str,
) -> MathResult<BigDecimal> {
    if den.is_zero() {
        return Err(MathError::DivisionByZero(what));
    }
    Ok(num / den)
}

/// Loss ratio of a `[lower, upper]` position when price moves from
/// `price_old` to `price_new`.
///
/// A zero denominator (degenerate range) is reported as
/// [`MathError::DegenerateDenominator`]; callers treat it as "estimate
/// unavailable".
pub fn estimate_loss(
    price_new: &Price,
    price_old: &Price,
    lower: &Price,
    upper: &Price,
) -> MathResult<BigDecimal> {
    let one = BigDecimal::one();
    let k = checked_ratio(price_new.as_big(), price_old.as_big(), "price_old")?;
    let sqrt_k = checked_sqrt(&k, "price ratio")?;

    let numerator = BigDecimal::from(2) * &sqrt_k - &one - &k;

    let lower_term = checked_sqrt(
        &checked_ratio(lower.as_big(), price_old.as_big(), "price_old")?,
        "lower / price_old",
    )?;
    let upper_term = checked_sqrt(
        &checked_ratio(price_old.as_big(), upper.as_big(), "upper")?,
        "price_old / upper",
    )?;
    let denominator = &one + &k - lower_term - &k * upper_term;

    if denominator.is_zero() {
        return Err(MathError::DegenerateDenominator);
    }
    checked_ratio(&numerator, &denominator, "loss denominator")
        .map(|loss| round_to_precision(&loss, PRECISION))
}

/// Loss ratio for a range sitting just below a stable-coin price,
/// normalised so the top of the range is `1`.
///
/// `ratio_below` is `p_new / upper` and `interval_ratio_below` is
/// `lower / upper`.
pub fn loss_below_stablecoin(
    ratio_below: Decimal,
    interval_ratio_below: Decimal,
) -> MathResult<BigDecimal> {
    estimate_loss(
        &Price::new(ratio_below),
        &Price::one(),
        &Price::new(interval_ratio_below),
        &Price::one(),
    )
}

/// `high - (high - low) * fraction`.
///
/// Used for the exit threshold and, with a larger fraction, the stop-loss.
pub fn exit_price(high: &Price, low: &Price, fraction: Decimal) -> Price {
    let (high, low) = (high.as_big(), low.as_big());
    Price::from_big(high - (high - low) * decimal_to_big(fraction))
}

/// Exit threshold plus the impermanent-loss-sized dump threshold above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpBand {
    pub exit_price: Price,
    pub dump_price: Price,
    /// Loss ratio from the top of the range down to `exit_price`.
    pub imp_loss: BigDecimal,
}

/// Compute the dump band for a `[low, high]` range.
///
/// `dump_price = exit_price * (1 - dump_factor * imp_loss)`; since the loss is
/// negative, the band sits above the exit threshold.
pub fn dump_band(
    high: &Price,
    low: &Price,
    exit_fraction: Decimal,
    dump_factor: Decimal,
) -> MathResult<DumpBand> {
    let exit = exit_price(high, low, exit_fraction);
    let imp_loss = estimate_loss(&exit, high, low, high)?;
    let widening = BigDecimal::one() - decimal_to_big(dump_factor) * &imp_loss;
    let dump = Price::from_big(exit.as_big() * widening);

    Ok(DumpBand {
        exit_price: exit,
        dump_price: dump,
        imp_loss,
    })
}

/// Loss estimate report for a stop-loss placed `fraction` of the way down a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LossEstimate {
    pub exit_price: Price,
    pub imp_loss: BigDecimal,
    pub imp_loss_percent: BigDecimal,
    /// Loss on a 1000 quote-token position.
    pub imp_loss_1000: BigDecimal,
    /// Loss on a 5000 quote-token position.
    pub imp_loss_5000: BigDecimal,
    /// `(high - low) / high`.
    pub range_fraction: BigDecimal,
    pub range_percent: BigDecimal,
}

pub fn loss_estimation(high: &Price, low: &Price, fraction: Decimal) -> MathResult<LossEstimate> {
    let exit = exit_price(high, low, fraction);
    let imp_loss = estimate_loss(&exit, high, low, high)?;
    let range_fraction = checked_ratio(
        &(high.as_big() - low.as_big()),
        high.as_big(),
        "high",
    )?;
    let range_fraction = round_to_precision(&range_fraction, PRECISION);

    Ok(LossEstimate {
        exit_price: exit,
        imp_loss_percent: &imp_loss * BigDecimal::from(100),
        imp_loss_1000: &imp_loss * BigDecimal::from(1000),
        imp_loss_5000: &imp_loss * BigDecimal::from(5000),
        imp_loss,
        range_percent: &range_fraction * BigDecimal::from(100),
        range_fraction,
    })
}
