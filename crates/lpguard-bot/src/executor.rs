//! Dry-run transaction executor.
//!
//! Logs what would be sent and returns a synthetic receipt. Nothing is
//! signed or submitted.

use std::sync::atomic::{AtomicU64, Ordering};

use lpguard_position::{BoxFuture, PositionResult, Receipt, SwapRequest, TransactionExecutor};
use tracing::info;

#[derive(Debug, Default)]
pub struct LoggingExecutor {
    sequence: AtomicU64,
}

impl LoggingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of actions "executed" so far.
    pub fn executed(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    fn receipt(&self) -> Receipt {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Receipt {
            transaction_hash: format!("dry-run-{n}"),
        }
    }
}

impl TransactionExecutor for LoggingExecutor {
    fn withdraw_liquidity(
        &self,
        position_id: u64,
        full: bool,
    ) -> BoxFuture<'_, PositionResult<Receipt>> {
        Box::pin(async move {
            let receipt = self.receipt();
            info!(
                position_id,
                full,
                tx = %receipt.transaction_hash,
                "[DRY-RUN] decreaseLiquidity"
            );
            Ok(receipt)
        })
    }

    fn collect_fees(&self, position_id: u64) -> BoxFuture<'_, PositionResult<Receipt>> {
        Box::pin(async move {
            let receipt = self.receipt();
            info!(position_id, tx = %receipt.transaction_hash, "[DRY-RUN] collect");
            Ok(receipt)
        })
    }

    fn swap(&self, request: SwapRequest) -> BoxFuture<'_, PositionResult<Receipt>> {
        Box::pin(async move {
            let receipt = self.receipt();
            info!(
                token_in = %request.token_in,
                token_out = %request.token_out,
                fee = request.fee,
                amount_in = %request.amount_in,
                tx = %receipt.transaction_hash,
                "[DRY-RUN] exactInputSingle"
            );
            Ok(receipt)
        })
    }
}
