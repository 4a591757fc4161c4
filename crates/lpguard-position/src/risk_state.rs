//! Per-position risk phase.
//!
//! ```text
//! Active ──Exit{amount_in, direction}──> Exited{..} ──Sell──> Sold{..}
//! ```
//!
//! Phases only move forward. The withdrawn amount and the quoting direction
//! it was measured in are captured on the exit transition and carried
//! unchanged into `Sold`.

use lpguard_core::Amount;
use serde::Serialize;

use crate::error::{PositionError, PositionResult};

/// Which token an evaluation prices the other in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteDirection {
    /// token1 per token0; token0 is sold on exit.
    Token1PerToken0,
    /// token0 per token1; token1 is sold on exit.
    Token0PerToken1,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RiskPhase {
    /// Liquidity still provided.
    #[default]
    Active,
    /// Liquidity withdrawn; `amount_in` of the base token waits to be sold.
    Exited {
        amount_in: Amount,
        direction: QuoteDirection,
    },
    /// Base token swapped to the stable token. Terminal.
    Sold {
        amount_in: Amount,
        direction: QuoteDirection,
    },
}

/// Input to [`RiskPhase::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskEvent {
    /// Withdraw and collect confirmed.
    Exit {
        amount_in: Amount,
        direction: QuoteDirection,
    },
    /// Swap confirmed (or skipped for a zero amount).
    Sell,
}

impl RiskPhase {
    /// The only way to move between phases.
    pub fn apply(self, event: RiskEvent) -> PositionResult<Self> {
        match (self, event) {
            (
                Self::Active,
                RiskEvent::Exit {
                    amount_in,
                    direction,
                },
            ) => Ok(Self::Exited {
                amount_in,
                direction,
            }),
            (
                Self::Exited {
                    amount_in,
                    direction,
                },
                RiskEvent::Sell,
            ) => Ok(Self::Sold {
                amount_in,
                direction,
            }),
            (from, event) => Err(PositionError::InvalidTransition {
                from: from.name(),
                to: match event {
                    RiskEvent::Exit { .. } => "exited",
                    RiskEvent::Sell => "sold",
                },
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exited { .. } => "exited",
            Self::Sold { .. } => "sold",
        }
    }

    /// True once liquidity has been withdrawn (stays true after the sale).
    pub fn is_exited(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn is_sold(&self) -> bool {
        matches!(self, Self::Sold { .. })
    }

    /// Amount captured at exit.
    pub fn amount_in(&self) -> Option<&Amount> {
        match self {
            Self::Active => None,
            Self::Exited { amount_in, .. } | Self::Sold { amount_in, .. } => Some(amount_in),
        }
    }

    /// Direction the exit was priced in; fixed for the rest of the position's life.
    pub fn direction(&self) -> Option<QuoteDirection> {
        match self {
            Self::Active => None,
            Self::Exited { direction, .. } | Self::Sold { direction, .. } => Some(*direction),
        }
    }

    /// Numeric phase for the metrics gauge.
    pub fn ordinal(&self) -> i64 {
        match self {
            Self::Active => 0,
            Self::Exited { .. } => 1,
            Self::Sold { .. } => 2,
        }
    }
}

impl std::fmt::Display for RiskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.amount_in() {
            Some(amount) => write!(f, "{} (amount_in={})", self.name(), amount),
            None => f.write_str(self.name()),
        }
    }
}
