//! Error types for lpguard-core.

use thiserror::Error;

/// Computation domain errors raised by price and loss math.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("Division by zero: {0}")]
    DivisionByZero(&'static str),

    #[error("Degenerate denominator in impermanent loss estimate")]
    DegenerateDenominator,

    #[error("Value out of decimal range: {0}")]
    Overflow(&'static str),

    #[error("Tick out of bounds: {0}")]
    TickOutOfBounds(i32),

    #[error("Sqrt price out of bounds")]
    SqrtPriceOutOfBounds,

    #[error("Negative operand for square root: {0}")]
    NegativeSqrt(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for math operations.
pub type MathResult<T> = std::result::Result<T, MathError>;
