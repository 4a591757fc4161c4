//! Position and pool data model.
//!
//! Snapshots are overwritten in place on every refresh; thresholds are
//! derived per evaluation and never stored.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decimal::{Amount, Price};

/// ERC-20 token identity and display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

impl TokenInfo {
    /// Case-insensitive symbol match.
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
    }
}

impl std::fmt::Display for TokenInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.symbol, self.address)
    }
}

/// Current pool price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Raw Q64.96 square-root price from `slot0`.
    pub sqrt_price_x96: U256,
    pub tick: i32,
    /// token1 per token0.
    pub price: Price,
    /// token0 per token1.
    pub inverted_price: Price,
    pub updated_at: DateTime<Utc>,
}

/// Position range, liquidity and token pair.
///
/// Everything except `liquidity` is fixed once the position is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRange {
    pub position_id: u64,
    pub tick_lower: i32,
    pub tick_upper: i32,
    /// Fee tier in hundredths of a basis point.
    pub fee: u32,
    pub liquidity: u128,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    /// Price at `tick_lower` (token1 per token0).
    pub price_lower: Price,
    /// Price at `tick_upper` (token1 per token0).
    pub price_upper: Price,
}

/// Reserves implied by liquidity and price, in whole-token units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedBalances {
    pub token0: Amount,
    pub token1: Amount,
}

/// Decision thresholds in the evaluation's quoting direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub exit_price: Price,
    pub stop_loss_price: Price,
    pub dump_price: Price,
}

impl std::fmt::Display for Thresholds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "exit={} stop_loss={} dump={}",
            self.exit_price, self.stop_loss_price, self.dump_price
        )
    }
}
