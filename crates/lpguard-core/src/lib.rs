//! Core math and data model for the lpguard position guard.
//!
//! This crate provides the pure building blocks used by the decision engine:
//! - `Price`, `Amount`: Arbitrary-precision numeric types covering the whole tick grid
//! - Tick and square-root price conversions on the exact Q64.96 grid
//! - Impermanent loss estimation and the dump band derived from it
//! - Clamped reserve derivation for concentrated-liquidity positions

pub mod decimal;
pub mod error;
pub mod impermanent_loss;
pub mod price_math;
pub mod reserves;
pub mod tick_math;
pub mod types;

pub use decimal::{big_to_decimal, decimal_to_big, Amount, Price, PRECISION};
pub use error::{MathError, MathResult};
pub use impermanent_loss::{
    dump_band, estimate_loss, exit_price, loss_below_stablecoin, loss_estimation, DumpBand,
    LossEstimate,
};
pub use price_math::{invert, price_from_sqrt, price_from_tick, tick_from_price};
pub use reserves::derive_balances;
pub use tick_math::{
    sqrt_ratio_at_tick, tick_at_sqrt_ratio, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO, MIN_TICK,
};
pub use types::{DerivedBalances, PoolSnapshot, PositionRange, Thresholds, TokenInfo};

pub use alloy::primitives::{Address, U256};
pub use bigdecimal::BigDecimal;
