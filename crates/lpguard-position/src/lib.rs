//! Position state and stop-loss decisions for one liquidity position.
//!
//! # Key Components
//!
//! - [`PositionState`]: Pool price, position range and derived balances
//! - [`RiskPhase`]: `Active -> Exited -> Sold`, one transition function
//! - [`RiskDecisionEngine`]: Single-flight evaluation driving the phase
//! - [`PoolDataSource`], [`PositionDataSource`], [`TokenMetadataSource`]:
//!   Read-side capability interfaces
//! - [`TransactionExecutor`]: Withdraw, collect and swap

pub mod engine;
pub mod error;
pub mod executor;
pub mod risk_state;
pub mod source;
pub mod state;

pub use engine::{
    compute_thresholds, EngineConfig, EvaluateOptions, Evaluation, EvaluationAction,
    EvaluationOutcome, PositionStatus, RiskDecisionEngine,
};
pub use error::{PositionError, PositionResult};
pub use executor::{
    DynExecutor, ExecutorCall, ExecutorCallKind, MockExecutor, Receipt, SwapRequest,
    TransactionExecutor,
};
pub use risk_state::{QuoteDirection, RiskEvent, RiskPhase};
pub use source::{
    BoxFuture, DataSources, DynPoolSource, DynPositionSource, DynTokenSource, MockPoolSource,
    MockPositionSource, MockTokenSource, PoolDataSource, PositionDataSource, PositionInfo, Slot0,
    TokenMetadata, TokenMetadataSource,
};
pub use state::PositionState;
