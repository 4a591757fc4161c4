//! Transaction executor interface.
//!
//! The engine never signs or submits transactions itself. It asks a
//! [`TransactionExecutor`] to withdraw, collect or swap and commits a risk
//! transition only once the receipt is back.

use std::collections::HashSet;
use std::sync::Arc;

use lpguard_core::{Address, Amount};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{PositionError, PositionResult};
use crate::source::BoxFuture;

/// Confirmation of an executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub transaction_hash: String,
}

/// Exact-input swap through the position's own pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    /// Pool fee tier in hundredths of a basis point.
    pub fee: u32,
    pub amount_in: Amount,
}

pub trait TransactionExecutor: Send + Sync {
    /// Remove liquidity; `full` withdraws all of it, otherwise half.
    fn withdraw_liquidity(
        &self,
        position_id: u64,
        full: bool,
    ) -> BoxFuture<'_, PositionResult<Receipt>>;

    /// Collect owed tokens and fees.
    fn collect_fees(&self, position_id: u64) -> BoxFuture<'_, PositionResult<Receipt>>;

    fn swap(&self, request: SwapRequest) -> BoxFuture<'_, PositionResult<Receipt>>;
}

/// Arc wrapper for TransactionExecutor trait objects.
pub type DynExecutor = Arc<dyn TransactionExecutor>;

/// Executor action, as recorded by [`MockExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Withdraw { position_id: u64, full: bool },
    CollectFees { position_id: u64 },
    Swap(SwapRequest),
}

impl ExecutorCall {
    fn kind(&self) -> ExecutorCallKind {
        match self {
            Self::Withdraw { .. } => ExecutorCallKind::Withdraw,
            Self::CollectFees { .. } => ExecutorCallKind::CollectFees,
            Self::Swap(_) => ExecutorCallKind::Swap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorCallKind {
    Withdraw,
    CollectFees,
    Swap,
}

/// Mock executor for testing.
///
/// Records every attempted call, including failed ones.
#[derive(Debug, Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    failing: Mutex<HashSet<ExecutorCallKind>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `kind` fail until cleared.
    pub fn set_failing(&self, kind: ExecutorCallKind, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(kind);
        } else {
            set.remove(&kind);
        }
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, kind: ExecutorCallKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind() == kind).count()
    }

    pub fn swaps(&self) -> Vec<SwapRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::Swap(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ExecutorCall) -> PositionResult<Receipt> {
        let kind = call.kind();
        let mut calls = self.calls.lock();
        calls.push(call);
        if self.failing.lock().contains(&kind) {
            return Err(PositionError::Executor(format!("{kind:?} reverted")));
        }
        Ok(Receipt {
            transaction_hash: format!("0x{:064x}", calls.len()),
        })
    }
}

impl TransactionExecutor for MockExecutor {
    fn withdraw_liquidity(
        &self,
        position_id: u64,
        full: bool,
    ) -> BoxFuture<'_, PositionResult<Receipt>> {
        Box::pin(async move { self.record(ExecutorCall::Withdraw { position_id, full }) })
    }

    fn collect_fees(&self, position_id: u64) -> BoxFuture<'_, PositionResult<Receipt>> {
        Box::pin(async move { self.record(ExecutorCall::CollectFees { position_id }) })
    }

    fn swap(&self, request: SwapRequest) -> BoxFuture<'_, PositionResult<Receipt>> {
        Box::pin(async move { self.record(ExecutorCall::Swap(request)) })
    }
}
