//! Position error types.

use lpguard_core::MathError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    /// Inconsistent or unusable setup; not retryable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pool, position or token data could not be read.
    #[error("Data source error: {0}")]
    Source(String),

    /// Withdraw, collect or swap failed.
    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Invalid risk transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

impl PositionError {
    /// Configuration errors abort startup; everything else is retried by the
    /// next evaluation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Source(_) => "source",
            Self::Executor(_) => "executor",
            Self::Math(_) => "math",
            Self::InvalidTransition { .. } => "transition",
        }
    }
}

pub type PositionResult<T> = Result<T, PositionError>;
