//! Current truth about the monitored position and its pool.
//!
//! `initialize` does the one blocking load; `refresh` re-reads the price and
//! liquidity and overwrites every derived field in one step. Range bounds and
//! token identities are fixed after initialization.

use chrono::Utc;
use lpguard_core::{
    derive_balances, price_from_sqrt, price_from_tick, Address, DerivedBalances, PoolSnapshot,
    PositionRange, TokenInfo,
};
use tracing::{debug, info, warn};

use crate::error::{PositionError, PositionResult};
use crate::source::{DataSources, PositionInfo, Slot0, TokenMetadata};

pub struct PositionState {
    sources: DataSources,
    pool: PoolSnapshot,
    range: PositionRange,
    balances: DerivedBalances,
}

impl std::fmt::Debug for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionState")
            .field("pool", &self.pool)
            .field("range", &self.range)
            .field("balances", &self.balances)
            .finish_non_exhaustive()
    }
}

impl PositionState {
    /// Load pool, position and token data for `position_id`.
    ///
    /// Fails with [`PositionError::Config`] if the pool's token pair is not
    /// the position's.
    pub async fn initialize(position_id: u64, sources: DataSources) -> PositionResult<Self> {
        info!(position_id, "Initializing position state");

        let slot0 = sources.pool.slot0().await?;
        let (pool_token0, pool_token1) = sources.pool.tokens().await?;
        let info = sources.position.position(position_id).await?;

        if (pool_token0, pool_token1) != (info.token0, info.token1) {
            return Err(PositionError::Config(format!(
                "pool pair {pool_token0}/{pool_token1} does not match position {position_id} \
                 pair {}/{}",
                info.token0, info.token1
            )));
        }

        let meta0 = sources.tokens.metadata(info.token0).await?;
        let meta1 = sources.tokens.metadata(info.token1).await?;
        let token0 = token_info(info.token0, meta0);
        let token1 = token_info(info.token1, meta1);

        let range = PositionRange {
            position_id,
            tick_lower: info.tick_lower,
            tick_upper: info.tick_upper,
            fee: info.fee,
            liquidity: info.liquidity,
            price_lower: price_from_tick(info.tick_lower, token0.decimals, token1.decimals)?,
            price_upper: price_from_tick(info.tick_upper, token0.decimals, token1.decimals)?,
            token0,
            token1,
        };
        let (pool, balances) = derive(&range, slot0)?;

        info!(
            position_id,
            token0 = %range.token0,
            token1 = %range.token1,
            tick_lower = range.tick_lower,
            tick_upper = range.tick_upper,
            fee = range.fee,
            liquidity = range.liquidity,
            price = %pool.price,
            "Position state initialized"
        );

        Ok(Self {
            sources,
            pool,
            range,
            balances,
        })
    }

    /// Re-read pool price and position liquidity, then recompute prices and
    /// balances.
    ///
    /// Nothing is overwritten unless every read and computation succeeds.
    pub async fn refresh(&mut self) -> PositionResult<()> {
        let slot0 = self.sources.pool.slot0().await?;
        let info = self.sources.position.position(self.range.position_id).await?;
        self.check_fixed_fields(&info);

        let mut range = self.range.clone();
        range.liquidity = info.liquidity;
        let (pool, balances) = derive(&range, slot0)?;

        debug!(
            tick = pool.tick,
            price = %pool.price,
            liquidity = range.liquidity,
            token0_balance = %balances.token0,
            token1_balance = %balances.token1,
            "Position state refreshed"
        );

        self.range = range;
        self.pool = pool;
        self.balances = balances;
        Ok(())
    }

    fn check_fixed_fields(&self, info: &PositionInfo) {
        if info.tick_lower != self.range.tick_lower
            || info.tick_upper != self.range.tick_upper
            || info.token0 != self.range.token0.address
            || info.token1 != self.range.token1.address
        {
            warn!(
                position_id = self.range.position_id,
                tick_lower = info.tick_lower,
                tick_upper = info.tick_upper,
                "Position range changed on chain, keeping the initial range"
            );
        }
    }

    pub fn pool(&self) -> &PoolSnapshot {
        &self.pool
    }

    pub fn range(&self) -> &PositionRange {
        &self.range
    }

    pub fn balances(&self) -> &DerivedBalances {
        &self.balances
    }

    pub fn position_id(&self) -> u64 {
        self.range.position_id
    }

    pub fn token0(&self) -> &TokenInfo {
        &self.range.token0
    }

    pub fn token1(&self) -> &TokenInfo {
        &self.range.token1
    }
}

fn token_info(address: Address, meta: TokenMetadata) -> TokenInfo {
    TokenInfo {
        address,
        decimals: meta.decimals,
        symbol: meta.symbol,
        name: meta.name,
    }
}

fn derive(range: &PositionRange, slot0: Slot0) -> PositionResult<(PoolSnapshot, DerivedBalances)> {
    let decimals0 = range.token0.decimals;
    let decimals1 = range.token1.decimals;

    let price = price_from_sqrt(slot0.sqrt_price_x96, decimals0, decimals1)?;
    let inverted_price = price.invert()?;
    let pool = PoolSnapshot {
        sqrt_price_x96: slot0.sqrt_price_x96,
        tick: slot0.tick,
        price,
        inverted_price,
        updated_at: Utc::now(),
    };
    let balances = derive_balances(
        range.liquidity,
        slot0.sqrt_price_x96,
        range.tick_lower,
        range.tick_upper,
        decimals0,
        decimals1,
    )?;
    Ok((pool, balances))
}
