//! Stop-loss decision engine for one liquidity position.
//!
//! Each trigger runs one evaluation:
//!
//! 1. Refresh [`PositionState`]
//! 2. Pick the quoting direction (stable token as quote); once exited, the
//!    direction recorded at exit is used for the rest of the position's life
//! 3. Derive exit, stop-loss and dump thresholds from the range bounds
//! 4. Apply at most one phase step:
//!    - `Active` below exit: withdraw + collect, then `Exited`
//!      (and straight on to `Sold` when counter-dump protection is off)
//!    - `Exited` above the dump band or below the stop-loss: swap, then `Sold`
//!    - `Sold`: nothing
//!
//! # Single flight
//!
//! The position state lives behind a `tokio::sync::Mutex` that is only ever
//! `try_lock`ed. A trigger arriving while another evaluation holds it is
//! dropped and reported as [`EvaluationOutcome::Skipped`]; the next trigger
//! sees fresh state anyway.
//!
//! # Commit order
//!
//! A phase transition is written only after the executor returned a receipt
//! for the action it stands for. A failed action leaves the phase untouched so
//! a later evaluation repeats it.

use std::time::Instant;

use lpguard_core::{
    dump_band, exit_price, Amount, DerivedBalances, PoolSnapshot, Price, Thresholds, TokenInfo,
};
use lpguard_telemetry::Metrics;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PositionError, PositionResult};
use crate::executor::{DynExecutor, SwapRequest};
use crate::risk_state::{QuoteDirection, RiskEvent, RiskPhase};
use crate::source::DataSources;
use crate::state::PositionState;

// ============================================================================
// Configuration
// ============================================================================

fn default_stop_loss_margin() -> Decimal {
    dec!(0.1)
}

fn default_dump_factor() -> Decimal {
    dec!(2)
}

fn default_stable_symbols() -> Vec<String> {
    vec!["USDC".to_string(), "USDT".to_string(), "DAI".to_string()]
}

/// Engine-wide settings fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Added to the exit fraction to place the stop-loss below the exit.
    #[serde(default = "default_stop_loss_margin")]
    pub stop_loss_margin: Decimal,

    /// Multiplier on the impermanent-loss estimate sizing the dump band.
    #[serde(default = "default_dump_factor")]
    pub dump_factor: Decimal,

    /// Symbols treated as the stable quote token.
    #[serde(default = "default_stable_symbols")]
    pub stable_symbols: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_loss_margin: default_stop_loss_margin(),
            dump_factor: default_dump_factor(),
            stable_symbols: default_stable_symbols(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> PositionResult<()> {
        if self.stop_loss_margin <= Decimal::ZERO || self.stop_loss_margin >= Decimal::ONE {
            return Err(PositionError::Config(format!(
                "stop_loss_margin must be in (0, 1), got {}",
                self.stop_loss_margin
            )));
        }
        if self.dump_factor <= Decimal::ONE {
            return Err(PositionError::Config(format!(
                "dump_factor must be greater than 1, got {}",
                self.dump_factor
            )));
        }
        Ok(())
    }
}

/// Per-call evaluation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateOptions {
    /// Compute and report, never act.
    pub test_mode: bool,
    /// Quote in token1 units of token0 is the default; this flips it.
    pub inverse_quote: bool,
    /// Pick the direction from whichever token is stable; overrides `inverse_quote`.
    pub auto_quote_stable: bool,
    /// Wait for the dump band after exiting instead of selling at once.
    pub counter_dump_protection: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            test_mode: false,
            inverse_quote: false,
            auto_quote_stable: false,
            counter_dump_protection: true,
        }
    }
}

// ============================================================================
// Evaluation results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationAction {
    /// Thresholds not crossed, or already sold.
    None,
    /// Test mode: values reported only.
    DryRun,
    Exited,
    /// Exit and sale in the same evaluation (counter-dump protection off).
    ExitedAndSold,
    Sold,
}

impl EvaluationAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "no_action",
            Self::DryRun => "dry_run",
            Self::Exited => "exited",
            Self::ExitedAndSold => "exited_and_sold",
            Self::Sold => "sold",
        }
    }
}

/// Everything one evaluation saw and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub direction: QuoteDirection,
    pub price: Price,
    pub lower: Price,
    pub upper: Price,
    pub thresholds: Thresholds,
    pub balances: DerivedBalances,
    pub phase_before: RiskPhase,
    pub phase: RiskPhase,
    pub action: EvaluationAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Another evaluation was in flight; this trigger was dropped.
    Skipped,
    Completed(Evaluation),
}

impl EvaluationOutcome {
    pub fn evaluation(&self) -> Option<&Evaluation> {
        match self {
            Self::Skipped => None,
            Self::Completed(evaluation) => Some(evaluation),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Read-only view published after every refresh and transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionStatus {
    pub position_id: u64,
    pub token0: String,
    pub token1: String,
    pub tick: i32,
    pub price: Price,
    pub inverted_price: Price,
    pub liquidity: u128,
    pub balances: DerivedBalances,
    pub phase: RiskPhase,
    pub thresholds: Option<Thresholds>,
}

/// Thresholds for a `[lower, upper]` range in the evaluation's direction.
///
/// An unavailable loss estimate collapses the dump band onto the exit price.
pub fn compute_thresholds(
    upper: &Price,
    lower: &Price,
    exit_fraction: Decimal,
    config: &EngineConfig,
) -> Thresholds {
    let exit = exit_price(upper, lower, exit_fraction);
    let stop_loss = exit_price(upper, lower, exit_fraction + config.stop_loss_margin);
    let dump = match dump_band(upper, lower, exit_fraction, config.dump_factor) {
        Ok(band) => band.dump_price,
        Err(e) => {
            warn!(error = %e, exit_price = %exit, "Loss estimate unavailable, dump band disabled");
            exit.clone()
        }
    };

    Thresholds {
        exit_price: exit,
        stop_loss_price: stop_loss,
        dump_price: dump,
    }
}

// ============================================================================
// RiskDecisionEngine
// ============================================================================

pub struct RiskDecisionEngine {
    config: EngineConfig,
    executor: DynExecutor,
    /// Owned position state; holding this lock is the single-flight guard.
    state: Mutex<PositionState>,
    status: RwLock<PositionStatus>,
    pool: RwLock<PoolSnapshot>,
    token0: TokenInfo,
    token1: TokenInfo,
}

impl RiskDecisionEngine {
    pub fn new(
        state: PositionState,
        executor: DynExecutor,
        config: EngineConfig,
    ) -> PositionResult<Self> {
        config.validate()?;

        let status = PositionStatus {
            position_id: state.position_id(),
            token0: state.token0().symbol.clone(),
            token1: state.token1().symbol.clone(),
            tick: state.pool().tick,
            price: state.pool().price.clone(),
            inverted_price: state.pool().inverted_price.clone(),
            liquidity: state.range().liquidity,
            balances: state.balances().clone(),
            phase: RiskPhase::Active,
            thresholds: None,
        };

        Ok(Self {
            config,
            executor,
            token0: state.token0().clone(),
            token1: state.token1().clone(),
            pool: RwLock::new(state.pool().clone()),
            status: RwLock::new(status),
            state: Mutex::new(state),
        })
    }

    /// Load the position and build an engine for it.
    pub async fn initialize(
        position_id: u64,
        sources: DataSources,
        executor: DynExecutor,
        config: EngineConfig,
    ) -> PositionResult<Self> {
        config.validate()?;
        let state = PositionState::initialize(position_id, sources).await?;
        Self::new(state, executor, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> PositionStatus {
        self.status.read().clone()
    }

    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.read().clone()
    }

    pub fn balances(&self) -> DerivedBalances {
        self.status.read().balances.clone()
    }

    pub fn risk_phase(&self) -> RiskPhase {
        self.status.read().phase.clone()
    }

    /// True while an evaluation holds the position.
    pub fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Run one evaluation unless another is in flight.
    ///
    /// Errors are logged here with the context needed to diagnose them and
    /// leave the risk phase as it was before the failing step.
    pub async fn evaluate(
        &self,
        exit_fraction: Decimal,
        options: &EvaluateOptions,
    ) -> PositionResult<EvaluationOutcome> {
        let Ok(mut state) = self.state.try_lock() else {
            debug!("Evaluation already in flight, dropping trigger");
            Metrics::evaluation("skipped");
            return Ok(EvaluationOutcome::Skipped);
        };

        let started = Instant::now();
        let result = self.evaluate_locked(&mut state, exit_fraction, options).await;
        drop(state);

        match &result {
            Ok(evaluation) => {
                Metrics::evaluation(evaluation.action.label());
                Metrics::evaluation_latency(started.elapsed().as_secs_f64() * 1000.0);
            }
            Err(e) => {
                let status = self.status();
                warn!(
                    error = %e,
                    fatal = e.is_fatal(),
                    price = %status.price,
                    thresholds = ?status.thresholds,
                    phase = %status.phase,
                    "Evaluation failed"
                );
                Metrics::evaluation_failed(e.kind());
            }
        }

        result.map(EvaluationOutcome::Completed)
    }

    async fn evaluate_locked(
        &self,
        state: &mut PositionState,
        exit_fraction: Decimal,
        options: &EvaluateOptions,
    ) -> PositionResult<Evaluation> {
        self.check_exit_fraction(exit_fraction)?;

        state.refresh().await?;
        self.publish_state(state);

        let phase_before = self.risk_phase();
        let direction = match phase_before.direction() {
            Some(direction) => direction,
            None => self.quote_direction(options)?,
        };
        let (price, lower, upper) = quoted_prices(state, direction)?;
        let thresholds = compute_thresholds(&upper, &lower, exit_fraction, &self.config);
        let balances = state.balances().clone();

        self.status.write().thresholds = Some(thresholds.clone());
        Metrics::observed(
            to_f64(&price),
            to_f64(&thresholds.exit_price),
            to_f64(&thresholds.stop_loss_price),
            to_f64(&thresholds.dump_price),
        );

        let below_exit = price < thresholds.exit_price;
        let above_dump = price > thresholds.dump_price;
        let below_stop = price < thresholds.stop_loss_price;

        let (base, quote) = self.base_and_quote(direction);
        info!(
            price = %price,
            lower = %lower,
            upper = %upper,
            exit_price = %thresholds.exit_price,
            stop_loss_price = %thresholds.stop_loss_price,
            dump_price = %thresholds.dump_price,
            below_exit,
            phase = %phase_before,
            base = %base.symbol,
            quote = %quote.symbol,
            token0_balance = %balances.token0,
            token1_balance = %balances.token1,
            test_mode = options.test_mode,
            "Evaluated position"
        );

        let mut evaluation = Evaluation {
            direction,
            price,
            lower,
            upper,
            thresholds,
            balances,
            phase_before: phase_before.clone(),
            phase: phase_before.clone(),
            action: EvaluationAction::None,
        };

        if options.test_mode {
            evaluation.action = EvaluationAction::DryRun;
            return Ok(evaluation);
        }

        match phase_before {
            RiskPhase::Active if below_exit => {
                let amount_in = self.exit_position(state, direction).await?;
                evaluation.action = EvaluationAction::Exited;

                if !options.counter_dump_protection {
                    info!("Counter-dump protection off, selling immediately");
                    self.sell(state, direction, amount_in).await?;
                    evaluation.action = EvaluationAction::ExitedAndSold;
                }
            }
            RiskPhase::Exited {
                amount_in,
                direction,
            } => {
                if !options.counter_dump_protection || above_dump || below_stop {
                    info!(
                        above_dump,
                        below_stop,
                        amount_in = %amount_in,
                        "Exited position left the hold band, selling"
                    );
                    self.sell(state, direction, amount_in).await?;
                    evaluation.action = EvaluationAction::Sold;
                }
            }
            RiskPhase::Active | RiskPhase::Sold { .. } => {}
        }

        evaluation.phase = self.risk_phase();
        Ok(evaluation)
    }

    fn check_exit_fraction(&self, exit_fraction: Decimal) -> PositionResult<()> {
        if exit_fraction <= Decimal::ZERO || exit_fraction >= Decimal::ONE {
            return Err(PositionError::Config(format!(
                "exit fraction must be in (0, 1), got {exit_fraction}"
            )));
        }
        if exit_fraction + self.config.stop_loss_margin > Decimal::ONE {
            return Err(PositionError::Config(format!(
                "exit fraction {exit_fraction} plus stop-loss margin {} exceeds 1",
                self.config.stop_loss_margin
            )));
        }
        Ok(())
    }

    fn quote_direction(&self, options: &EvaluateOptions) -> PositionResult<QuoteDirection> {
        if !options.auto_quote_stable {
            return Ok(if options.inverse_quote {
                QuoteDirection::Token0PerToken1
            } else {
                QuoteDirection::Token1PerToken0
            });
        }

        let is_stable = |token: &TokenInfo| {
            self.config
                .stable_symbols
                .iter()
                .any(|symbol| token.has_symbol(symbol))
        };
        if is_stable(&self.token1) {
            Ok(QuoteDirection::Token1PerToken0)
        } else if is_stable(&self.token0) {
            Ok(QuoteDirection::Token0PerToken1)
        } else {
            Err(PositionError::Config(format!(
                "no stable token in pair {}/{} (stable symbols: {:?})",
                self.token0.symbol, self.token1.symbol, self.config.stable_symbols
            )))
        }
    }

    /// `(base, quote)`: base is sold for quote on exit.
    fn base_and_quote(&self, direction: QuoteDirection) -> (&TokenInfo, &TokenInfo) {
        match direction {
            QuoteDirection::Token1PerToken0 => (&self.token0, &self.token1),
            QuoteDirection::Token0PerToken1 => (&self.token1, &self.token0),
        }
    }

    /// Withdraw all liquidity and collect, then commit `Exited`.
    ///
    /// The amount to sell is the base-token balance derived by the refresh
    /// that triggered the exit.
    async fn exit_position(
        &self,
        state: &PositionState,
        direction: QuoteDirection,
    ) -> PositionResult<Amount> {
        let position_id = state.position_id();
        let amount_in = match direction {
            QuoteDirection::Token1PerToken0 => state.balances().token0.clone(),
            QuoteDirection::Token0PerToken1 => state.balances().token1.clone(),
        };

        info!(
            position_id,
            amount_in = %amount_in,
            "Price below exit threshold, withdrawing liquidity"
        );
        let withdraw = self.executor.withdraw_liquidity(position_id, true).await?;
        let collect = self.executor.collect_fees(position_id).await?;
        info!(
            withdraw_tx = %withdraw.transaction_hash,
            collect_tx = %collect.transaction_hash,
            "Liquidity withdrawn and fees collected"
        );

        self.commit(RiskEvent::Exit {
            amount_in: amount_in.clone(),
            direction,
        })?;
        Ok(amount_in)
    }

    /// Swap the exited amount to the quote token, then commit `Sold`.
    async fn sell(
        &self,
        state: &PositionState,
        direction: QuoteDirection,
        amount_in: Amount,
    ) -> PositionResult<()> {
        let (base, quote) = self.base_and_quote(direction);

        if amount_in.is_zero() {
            info!(token = %base.symbol, "Nothing to sell, skipping swap");
        } else {
            info!(
                token_in = %base.symbol,
                token_out = %quote.symbol,
                fee = state.range().fee,
                amount_in = %amount_in,
                "Swapping to stable token"
            );
            let request = SwapRequest {
                token_in: base.address,
                token_out: quote.address,
                fee: state.range().fee,
                amount_in,
            };
            let receipt = self.executor.swap(request).await?;
            info!(swap_tx = %receipt.transaction_hash, "Swap confirmed");
        }

        self.commit(RiskEvent::Sell)
    }

    fn commit(&self, event: RiskEvent) -> PositionResult<()> {
        let mut status = self.status.write();
        let next = status.phase.clone().apply(event)?;
        info!(from = %status.phase, to = %next, "Risk phase transition");
        Metrics::risk_phase(next.ordinal());
        status.phase = next;
        Ok(())
    }

    fn publish_state(&self, state: &PositionState) {
        let pool = state.pool().clone();
        {
            let mut status = self.status.write();
            status.tick = pool.tick;
            status.price = pool.price.clone();
            status.inverted_price = pool.inverted_price.clone();
            status.liquidity = state.range().liquidity;
            status.balances = state.balances().clone();
        }
        *self.pool.write() = pool;
    }
}

/// `(price, lower, upper)` in `direction`. Inverting swaps the bounds.
fn quoted_prices(
    state: &PositionState,
    direction: QuoteDirection,
) -> PositionResult<(Price, Price, Price)> {
    let pool = state.pool();
    let range = state.range();
    match direction {
        QuoteDirection::Token1PerToken0 => Ok((
            pool.price.clone(),
            range.price_lower.clone(),
            range.price_upper.clone(),
        )),
        QuoteDirection::Token0PerToken1 => Ok((
            pool.inverted_price.clone(),
            range.price_upper.invert()?,
            range.price_lower.invert()?,
        )),
    }
}

fn to_f64(price: &Price) -> f64 {
    price.to_f64().unwrap_or_default()
}
