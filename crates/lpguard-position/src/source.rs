//! Capability interfaces for reading pool, position and token data.
//!
//! The engine only sees these traits; the binary backs them with `eth_call`
//! through the event feed, tests back them with the recording mocks below.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use lpguard_core::{sqrt_ratio_at_tick, Address, U256};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{PositionError, PositionResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pool `slot0` subset used for pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

/// Position manager `positions(id)` subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub fee: u32,
    pub liquidity: u128,
    pub token0: Address,
    pub token1: Address,
}

/// ERC-20 metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

pub trait PoolDataSource: Send + Sync {
    /// Current square-root price and tick.
    fn slot0(&self) -> BoxFuture<'_, PositionResult<Slot0>>;

    /// Pool token pair `(token0, token1)`.
    fn tokens(&self) -> BoxFuture<'_, PositionResult<(Address, Address)>>;
}

pub trait PositionDataSource: Send + Sync {
    fn position(&self, position_id: u64) -> BoxFuture<'_, PositionResult<PositionInfo>>;
}

pub trait TokenMetadataSource: Send + Sync {
    fn metadata(&self, token: Address) -> BoxFuture<'_, PositionResult<TokenMetadata>>;
}

/// Arc wrappers for trait objects.
pub type DynPoolSource = Arc<dyn PoolDataSource>;
pub type DynPositionSource = Arc<dyn PositionDataSource>;
pub type DynTokenSource = Arc<dyn TokenMetadataSource>;

/// The three read-side sources a position needs.
#[derive(Clone)]
pub struct DataSources {
    pub pool: DynPoolSource,
    pub position: DynPositionSource,
    pub tokens: DynTokenSource,
}

// ============================================================================
// Mocks
// ============================================================================

/// Mock pool with a settable tick.
///
/// `gate_next_slot0` makes the next `slot0` call park until `release` is
/// called, so a test can hold an evaluation inside its refresh.
#[derive(Debug)]
pub struct MockPoolSource {
    slot0: Mutex<Slot0>,
    tokens: (Address, Address),
    failing: AtomicBool,
    calls: AtomicUsize,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl MockPoolSource {
    pub fn new(tick: i32, token0: Address, token1: Address) -> Self {
        Self {
            slot0: Mutex::new(slot0_at(tick)),
            tokens: (token0, token1),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Move the pool to `tick` (exact square-root price at the tick).
    pub fn set_tick(&self, tick: i32) {
        *self.slot0.lock() = slot0_at(tick);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn slot0_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn gate_next_slot0(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Wait until a gated `slot0` call is parked.
    pub async fn wait_gated(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

fn slot0_at(tick: i32) -> Slot0 {
    Slot0 {
        sqrt_price_x96: sqrt_ratio_at_tick(tick).unwrap_or(U256::ZERO),
        tick,
    }
}

impl PoolDataSource for MockPoolSource {
    fn slot0(&self) -> BoxFuture<'_, PositionResult<Slot0>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(PositionError::Source("slot0 unavailable".to_string()));
            }
            Ok(*self.slot0.lock())
        })
    }

    fn tokens(&self) -> BoxFuture<'_, PositionResult<(Address, Address)>> {
        Box::pin(async move { Ok(self.tokens) })
    }
}

/// Mock position manager holding one position.
#[derive(Debug)]
pub struct MockPositionSource {
    info: Mutex<PositionInfo>,
    calls: AtomicUsize,
}

impl MockPositionSource {
    pub fn new(info: PositionInfo) -> Self {
        Self {
            info: Mutex::new(info),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_liquidity(&self, liquidity: u128) {
        self.info.lock().liquidity = liquidity;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PositionDataSource for MockPositionSource {
    fn position(&self, _position_id: u64) -> BoxFuture<'_, PositionResult<PositionInfo>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.info.lock().clone())
        })
    }
}

/// Mock token metadata keyed by address; unknown tokens fail.
#[derive(Debug, Default)]
pub struct MockTokenSource {
    tokens: Mutex<HashMap<Address, TokenMetadata>>,
}

impl MockTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, address: Address, decimals: u8, symbol: &str) -> Self {
        self.tokens.lock().insert(
            address,
            TokenMetadata {
                decimals,
                symbol: symbol.to_string(),
                name: symbol.to_string(),
            },
        );
        self
    }
}

impl TokenMetadataSource for MockTokenSource {
    fn metadata(&self, token: Address) -> BoxFuture<'_, PositionResult<TokenMetadata>> {
        Box::pin(async move {
            self.tokens
                .lock()
                .get(&token)
                .cloned()
                .ok_or_else(|| PositionError::Source(format!("unknown token {token}")))
        })
    }
}
