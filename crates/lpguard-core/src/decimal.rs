//! Precision-safe decimal types for pool prices and token amounts.
//!
//! Prices span the whole tick grid, roughly `1e-38 .. 1e38` before the token
//! decimal correction, so they are kept as arbitrary-precision `BigDecimal`
//! values. Thresholds computed from them drive irreversible on-chain actions,
//! so binary floating point stays out of every comparison.
//!
//! Inexact steps (division, square root) are rounded to [`PRECISION`]
//! significant digits. `rust_decimal::Decimal` is used at the edges:
//! configuration fractions coming in and human reports going out.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, One, ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MathError, MathResult};

/// Significant digits kept after an inexact operation.
pub const PRECISION: u64 = 50;

/// Largest scale `rust_decimal` supports.
const DECIMAL_MAX_SCALE: i64 = 28;

/// Exact conversion of a `Decimal` into a `BigDecimal`.
pub fn decimal_to_big(value: Decimal) -> BigDecimal {
    BigDecimal::new(BigInt::from(value.mantissa()), i64::from(value.scale()))
}

/// Nearest `Decimal` to `value`.
///
/// Fails when `value` is outside the `Decimal` range, or when it is non-zero
/// but smaller than `1e-28` and would otherwise read back as zero.
pub fn big_to_decimal(value: &BigDecimal) -> MathResult<Decimal> {
    if value.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let mut rounded = round_to_precision(value, 28);
    let (_, scale) = rounded.as_bigint_and_exponent();
    if scale > DECIMAL_MAX_SCALE {
        rounded = rounded.with_scale(DECIMAL_MAX_SCALE);
    } else if scale < 0 {
        rounded = rounded.with_scale(0);
    }

    let (digits, scale) = rounded.as_bigint_and_exponent();
    if digits.is_zero() {
        return Err(MathError::Overflow("value below decimal precision"));
    }
    let mantissa = digits
        .to_i128()
        .ok_or(MathError::Overflow("value exceeds decimal range"))?;
    let scale = u32::try_from(scale).map_err(|_| MathError::Overflow("decimal scale"))?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map(|d| d.normalize())
        .map_err(|_| MathError::Overflow("value exceeds decimal range"))
}

/// Round to `digits` significant digits; shorter values are left as they are.
pub(crate) fn round_to_precision(value: &BigDecimal, digits: u64) -> BigDecimal {
    if value.digits() > digits {
        value.with_prec(digits)
    } else {
        value.clone()
    }
}

/// Human-scaled price (quote token per base token).
///
/// Wraps `BigDecimal` to keep prices and token amounts from being mixed up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(BigDecimal);

impl Price {
    /// Exact price from a `Decimal`.
    pub fn new(value: Decimal) -> Self {
        Self(decimal_to_big(value))
    }

    /// Price from a computed value, rounded to [`PRECISION`] digits.
    pub fn from_big(value: BigDecimal) -> Self {
        Self(round_to_precision(&value, PRECISION))
    }

    pub fn zero() -> Self {
        Self(BigDecimal::zero())
    }

    pub fn one() -> Self {
        Self(BigDecimal::one())
    }

    #[inline]
    pub fn as_big(&self) -> &BigDecimal {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > BigDecimal::zero()
    }

    /// Reciprocal price: re-expresses a price quoted in one token as quoted in the other.
    pub fn invert(&self) -> MathResult<Self> {
        if self.0.is_zero() {
            return Err(MathError::DivisionByZero("invert zero price"));
        }
        Ok(Self::from_big(BigDecimal::one() / &self.0))
    }

    pub fn to_decimal(&self) -> MathResult<Decimal> {
        big_to_decimal(&self.0)
    }

    /// Lossy conversion for gauges and log estimates.
    pub fn to_f64(&self) -> Option<f64> {
        self.0.to_f64()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self::new(d)
    }
}

/// Token amount in whole-token units (already scaled by `10^-decimals`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(BigDecimal);

impl Amount {
    pub fn new(value: Decimal) -> Self {
        Self(decimal_to_big(value))
    }

    pub fn from_big(value: BigDecimal) -> Self {
        Self(round_to_precision(&value, PRECISION))
    }

    pub fn zero() -> Self {
        Self(BigDecimal::zero())
    }

    #[inline]
    pub fn as_big(&self) -> &BigDecimal {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > BigDecimal::zero()
    }

    pub fn to_decimal(&self) -> MathResult<Decimal> {
        big_to_decimal(&self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
