//! RPC-backed data sources.
//!
//! Pool, position manager and ERC-20 reads are plain `eth_call`s issued
//! through the event feed's request path, so a call in flight when the
//! connection drops is replayed on the next one.
//!
//! When no pool address is configured it is looked up through the factory
//! from the position's token pair and fee tier.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::aliases::U24;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use lpguard_core::{Address, U256};
use lpguard_position::{
    BoxFuture, DataSources, PoolDataSource, PositionDataSource, PositionError, PositionInfo,
    PositionResult, Slot0, TokenMetadata, TokenMetadataSource,
};
use lpguard_ws::{FeedHandle, WsResult};
use serde_json::{json, Value};
use tracing::{info, trace};

use crate::config::PoolEvent;

sol! {
    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
        function token0() external view returns (address);
        function token1() external view returns (address);

        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );
        event Mint(
            address sender,
            address indexed owner,
            int24 indexed tickLower,
            int24 indexed tickUpper,
            uint128 amount,
            uint256 amount0,
            uint256 amount1
        );
        event Burn(
            address indexed owner,
            int24 indexed tickLower,
            int24 indexed tickUpper,
            uint128 amount,
            uint256 amount0,
            uint256 amount1
        );
    }

    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee)
            external view returns (address pool);
    }

    interface INonfungiblePositionManager {
        function positions(uint256 tokenId) external view returns (
            uint96 nonce,
            address operator,
            address token0,
            address token1,
            uint24 fee,
            int24 tickLower,
            int24 tickUpper,
            uint128 liquidity,
            uint256 feeGrowthInside0LastX128,
            uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0,
            uint128 tokensOwed1
        );
    }

    interface IERC20Metadata {
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function name() external view returns (string);
    }
}

impl PoolEvent {
    /// Log topic0 of the event.
    pub fn topic(&self) -> alloy::primitives::B256 {
        match self {
            Self::Swap => IUniswapV3Pool::Swap::SIGNATURE_HASH,
            Self::Mint => IUniswapV3Pool::Mint::SIGNATURE_HASH,
            Self::Burn => IUniswapV3Pool::Burn::SIGNATURE_HASH,
        }
    }

    /// `eth_subscribe` params for this event's logs on `pool`.
    pub fn subscription_params(&self, pool: Address) -> Value {
        json!([
            "logs",
            {
                "address": pool.to_string(),
                "topics": [[self.topic().to_string()]],
            }
        ])
    }
}

/// Minimal JSON-RPC request capability.
pub trait JsonRpc: Send + Sync {
    fn request(&self, method: &str, params: Value) -> BoxFuture<'_, WsResult<Value>>;
}

impl JsonRpc for FeedHandle {
    fn request(&self, method: &str, params: Value) -> BoxFuture<'_, WsResult<Value>> {
        let method = method.to_string();
        Box::pin(async move { FeedHandle::request(self, &method, params).await })
    }
}

/// Issues ABI-encoded `eth_call`s with a per-call deadline.
#[derive(Clone)]
pub struct EthCallClient {
    rpc: Arc<dyn JsonRpc>,
    timeout: Duration,
}

impl EthCallClient {
    pub fn new(rpc: Arc<dyn JsonRpc>, timeout: Duration) -> Self {
        Self { rpc, timeout }
    }

    /// Call `to` at the latest block and decode the return data.
    pub async fn call<C: SolCall>(&self, to: Address, call: &C) -> PositionResult<C::Return> {
        let data = call.abi_encode();
        let params = json!([
            {
                "to": to.to_string(),
                "data": format!("0x{}", hex::encode(&data)),
            },
            "latest"
        ]);
        trace!(%to, function = C::SIGNATURE, "eth_call");

        let result = tokio::time::timeout(self.timeout, self.rpc.request("eth_call", params))
            .await
            .map_err(|_| {
                PositionError::Source(format!("eth_call {} on {to} timed out", C::SIGNATURE))
            })?
            .map_err(|e| {
                PositionError::Source(format!("eth_call {} on {to} failed: {e}", C::SIGNATURE))
            })?;

        let bytes = decode_hex(&result).map_err(|e| {
            PositionError::Source(format!("eth_call {} on {to}: {e}", C::SIGNATURE))
        })?;
        C::abi_decode_returns(&bytes, true).map_err(|e| {
            PositionError::Source(format!(
                "eth_call {} on {to} returned undecodable data: {e}",
                C::SIGNATURE
            ))
        })
    }
}

fn decode_hex(value: &Value) -> Result<Vec<u8>, String> {
    let text = value
        .as_str()
        .ok_or_else(|| format!("expected hex string result, got {value}"))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return Err("empty result (no contract at address?)".to_string());
    }
    hex::decode(digits).map_err(|e| format!("invalid hex result: {e}"))
}

fn narrow<T, U>(field: &str, value: T) -> PositionResult<U>
where
    U: TryFrom<T>,
    <U as TryFrom<T>>::Error: std::fmt::Display,
{
    U::try_from(value).map_err(|e| PositionError::Source(format!("{field} out of range: {e}")))
}

/// Uniswap v3 pool contract.
pub struct RpcPool {
    client: EthCallClient,
    address: Address,
}

impl RpcPool {
    pub fn new(client: EthCallClient, address: Address) -> Self {
        Self { client, address }
    }
}

impl PoolDataSource for RpcPool {
    fn slot0(&self) -> BoxFuture<'_, PositionResult<Slot0>> {
        Box::pin(async move {
            let ret = self
                .client
                .call(self.address, &IUniswapV3Pool::slot0Call {})
                .await?;
            Ok(Slot0 {
                sqrt_price_x96: U256::from(ret.sqrtPriceX96),
                tick: narrow("tick", ret.tick)?,
            })
        })
    }

    fn tokens(&self) -> BoxFuture<'_, PositionResult<(Address, Address)>> {
        Box::pin(async move {
            let token0 = self
                .client
                .call(self.address, &IUniswapV3Pool::token0Call {})
                .await?;
            let token1 = self
                .client
                .call(self.address, &IUniswapV3Pool::token1Call {})
                .await?;
            Ok((token0._0, token1._0))
        })
    }
}

/// NonfungiblePositionManager contract.
pub struct RpcPositionManager {
    client: EthCallClient,
    address: Address,
}

impl RpcPositionManager {
    pub fn new(client: EthCallClient, address: Address) -> Self {
        Self { client, address }
    }
}

impl PositionDataSource for RpcPositionManager {
    fn position(&self, position_id: u64) -> BoxFuture<'_, PositionResult<PositionInfo>> {
        Box::pin(async move {
            let call = INonfungiblePositionManager::positionsCall {
                tokenId: U256::from(position_id),
            };
            let ret = self.client.call(self.address, &call).await?;
            Ok(PositionInfo {
                tick_lower: narrow("tickLower", ret.tickLower)?,
                tick_upper: narrow("tickUpper", ret.tickUpper)?,
                fee: narrow("fee", ret.fee)?,
                liquidity: ret.liquidity,
                token0: ret.token0,
                token1: ret.token1,
            })
        })
    }
}

/// Uniswap v3 factory contract.
pub struct RpcFactory {
    client: EthCallClient,
    address: Address,
}

impl RpcFactory {
    pub fn new(client: EthCallClient, address: Address) -> Self {
        Self { client, address }
    }

    /// Pool deployed for the pair and fee tier; the zero address if none.
    pub async fn pool(&self, token0: Address, token1: Address, fee: u32) -> PositionResult<Address> {
        let fee = U24::try_from(fee)
            .map_err(|e| PositionError::Config(format!("fee tier {fee} out of range: {e}")))?;
        let call = IUniswapV3Factory::getPoolCall {
            tokenA: token0,
            tokenB: token1,
            fee,
        };
        Ok(self.client.call(self.address, &call).await?.pool)
    }
}

/// Find the pool of `position_id` through the factory.
///
/// A pair with no deployed pool is a configuration error.
pub async fn resolve_pool_address(
    client: &EthCallClient,
    factory: Address,
    position_manager: Address,
    position_id: u64,
) -> PositionResult<Address> {
    let info = RpcPositionManager::new(client.clone(), position_manager)
        .position(position_id)
        .await?;
    let pool = RpcFactory::new(client.clone(), factory)
        .pool(info.token0, info.token1, info.fee)
        .await?;
    if pool == Address::ZERO {
        return Err(PositionError::Config(format!(
            "factory {factory} has no pool for {}/{} fee {}",
            info.token0, info.token1, info.fee
        )));
    }
    info!(%pool, position_id, fee = info.fee, "Resolved pool through factory");
    Ok(pool)
}

/// ERC-20 metadata reader.
pub struct RpcTokens {
    client: EthCallClient,
}

impl RpcTokens {
    pub fn new(client: EthCallClient) -> Self {
        Self { client }
    }
}

impl TokenMetadataSource for RpcTokens {
    fn metadata(&self, token: Address) -> BoxFuture<'_, PositionResult<TokenMetadata>> {
        Box::pin(async move {
            let decimals = self
                .client
                .call(token, &IERC20Metadata::decimalsCall {})
                .await?;
            let symbol = self
                .client
                .call(token, &IERC20Metadata::symbolCall {})
                .await?;
            let name = self.client.call(token, &IERC20Metadata::nameCall {}).await?;
            Ok(TokenMetadata {
                decimals: decimals._0,
                symbol: symbol._0,
                name: name._0,
            })
        })
    }
}

/// Wire the three read-side sources onto one RPC client.
pub fn data_sources(
    client: EthCallClient,
    pool_address: Address,
    position_manager_address: Address,
) -> DataSources {
    DataSources {
        pool: Arc::new(RpcPool::new(client.clone(), pool_address)),
        position: Arc::new(RpcPositionManager::new(
            client.clone(),
            position_manager_address,
        )),
        tokens: Arc::new(RpcTokens::new(client)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolValue;
    use lpguard_core::sqrt_ratio_at_tick;
    use lpguard_ws::WsError;
    use parking_lot::Mutex;

    const POOL: Address = Address::repeat_byte(0x11);
    const MANAGER: Address = Address::repeat_byte(0x22);
    const FACTORY: Address = Address::repeat_byte(0xfa);
    const WETH: Address = Address::repeat_byte(0xee);
    const DAI: Address = Address::repeat_byte(0xda);

    /// Answers `eth_call` with a fixed payload per function selector.
    #[derive(Default)]
    struct ScriptedRpc {
        replies: Mutex<Vec<([u8; 4], Result<Value, String>)>>,
        calls: Mutex<Vec<Value>>,
    }

    impl ScriptedRpc {
        fn reply<C: SolCall>(self, data: Vec<u8>) -> Self {
            self.replies
                .lock()
                .push((C::SELECTOR, Ok(json!(format!("0x{}", hex::encode(data))))));
            self
        }

        fn fail<C: SolCall>(self, message: &str) -> Self {
            self.replies
                .lock()
                .push((C::SELECTOR, Err(message.to_string())));
            self
        }
    }

    impl JsonRpc for ScriptedRpc {
        fn request(&self, method: &str, params: Value) -> BoxFuture<'_, WsResult<Value>> {
            assert_eq!(method, "eth_call");
            Box::pin(async move {
                self.calls.lock().push(params.clone());
                let data = params[0]["data"].as_str().unwrap_or_default();
                let selector = hex::decode(&data[2..10]).unwrap();
                let replies = self.replies.lock();
                let (_, reply) = replies
                    .iter()
                    .find(|(s, _)| s[..] == selector[..])
                    .expect("unscripted selector");
                reply.clone().map_err(|message| WsError::Rpc {
                    code: -32000,
                    message,
                })
            })
        }
    }

    fn client(rpc: ScriptedRpc) -> EthCallClient {
        EthCallClient::new(Arc::new(rpc), Duration::from_secs(1))
    }

    fn slot0_return(tick: i32) -> Vec<u8> {
        let sqrt = sqrt_ratio_at_tick(tick).unwrap();
        (
            sqrt,
            alloy::primitives::I256::try_from(tick).unwrap(),
            1u16,
            1u16,
            1u16,
            U256::ZERO,
            true,
        )
            .abi_encode_params()
    }

    #[tokio::test]
    async fn test_slot0_decodes_price_and_tick() {
        let rpc = ScriptedRpc::default()
            .reply::<IUniswapV3Pool::slot0Call>(slot0_return(-201_000));
        let pool = RpcPool::new(client(rpc), POOL);

        let slot0 = pool.slot0().await.unwrap();
        assert_eq!(slot0.tick, -201_000);
        assert_eq!(slot0.sqrt_price_x96, sqrt_ratio_at_tick(-201_000).unwrap());
    }

    #[tokio::test]
    async fn test_pool_tokens() {
        let rpc = ScriptedRpc::default()
            .reply::<IUniswapV3Pool::token0Call>(WETH.abi_encode())
            .reply::<IUniswapV3Pool::token1Call>(DAI.abi_encode());
        let pool = RpcPool::new(client(rpc), POOL);

        assert_eq!(pool.tokens().await.unwrap(), (WETH, DAI));
    }

    fn positions_return() -> Vec<u8> {
        (
            U256::ZERO,
            Address::ZERO,
            WETH,
            DAI,
            U256::from(3000u32),
            alloy::primitives::I256::try_from(69_000).unwrap(),
            alloy::primitives::I256::try_from(76_000).unwrap(),
            U256::from(10u128.pow(18)),
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
        )
            .abi_encode_params()
    }

    #[tokio::test]
    async fn test_position_decodes_range() {
        let rpc = ScriptedRpc::default()
            .reply::<INonfungiblePositionManager::positionsCall>(positions_return());
        let manager = RpcPositionManager::new(client(rpc), MANAGER);

        let info = manager.position(42).await.unwrap();
        assert_eq!(info.tick_lower, 69_000);
        assert_eq!(info.tick_upper, 76_000);
        assert_eq!(info.fee, 3000);
        assert_eq!(info.liquidity, 10u128.pow(18));
        assert_eq!((info.token0, info.token1), (WETH, DAI));
    }

    #[tokio::test]
    async fn test_pool_resolved_through_factory() {
        let rpc = Arc::new(
            ScriptedRpc::default()
                .reply::<INonfungiblePositionManager::positionsCall>(positions_return())
                .reply::<IUniswapV3Factory::getPoolCall>(POOL.abi_encode()),
        );
        let client = EthCallClient::new(rpc.clone(), Duration::from_secs(1));

        let pool = resolve_pool_address(&client, FACTORY, MANAGER, 42).await.unwrap();
        assert_eq!(pool, POOL);

        let calls = rpc.calls.lock();
        assert_eq!(
            calls[1][0]["to"].as_str().unwrap().to_lowercase(),
            format!("0x{}", "fa".repeat(20))
        );
        let data = hex::decode(&calls[1][0]["data"].as_str().unwrap()[2..]).unwrap();
        let call = IUniswapV3Factory::getPoolCall::abi_decode(&data, true).unwrap();
        assert_eq!((call.tokenA, call.tokenB), (WETH, DAI));
        assert_eq!(call.fee, U24::try_from(3000u32).unwrap());
    }

    #[tokio::test]
    async fn test_missing_pool_is_fatal() {
        let rpc = ScriptedRpc::default()
            .reply::<INonfungiblePositionManager::positionsCall>(positions_return())
            .reply::<IUniswapV3Factory::getPoolCall>(Address::ZERO.abi_encode());

        let err = resolve_pool_address(&client(rpc), FACTORY, MANAGER, 42)
            .await
            .unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }

    #[tokio::test]
    async fn test_token_metadata() {
        let rpc = ScriptedRpc::default()
            .reply::<IERC20Metadata::decimalsCall>(U256::from(6u8).abi_encode())
            .reply::<IERC20Metadata::symbolCall>("USDC".to_string().abi_encode())
            .reply::<IERC20Metadata::nameCall>("USD Coin".to_string().abi_encode());
        let tokens = RpcTokens::new(client(rpc));

        let meta = tokens.metadata(DAI).await.unwrap();
        assert_eq!(meta.decimals, 6);
        assert_eq!(meta.symbol, "USDC");
        assert_eq!(meta.name, "USD Coin");
    }

    #[tokio::test]
    async fn test_call_params_target_latest_block() {
        let rpc = Arc::new(
            ScriptedRpc::default().reply::<IUniswapV3Pool::token0Call>(WETH.abi_encode()),
        );
        let client = EthCallClient::new(rpc.clone(), Duration::from_secs(1));
        client
            .call(POOL, &IUniswapV3Pool::token0Call {})
            .await
            .unwrap();

        let params = rpc.calls.lock()[0].clone();
        assert_eq!(params[1], "latest");
        assert_eq!(
            params[0]["to"].as_str().unwrap().to_lowercase(),
            format!("0x{}", "11".repeat(20))
        );
        assert_eq!(
            params[0]["data"],
            format!("0x{}", hex::encode(IUniswapV3Pool::token0Call::SELECTOR))
        );
    }

    #[tokio::test]
    async fn test_rpc_error_is_source_error() {
        let rpc = ScriptedRpc::default().fail::<IUniswapV3Pool::slot0Call>("execution reverted");
        let pool = RpcPool::new(client(rpc), POOL);

        let err = pool.slot0().await.unwrap_err();
        assert!(matches!(err, PositionError::Source(ref m) if m.contains("reverted")));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_empty_result_is_source_error() {
        let rpc = ScriptedRpc::default().reply::<IERC20Metadata::decimalsCall>(Vec::new());
        let tokens = RpcTokens::new(client(rpc));

        assert!(matches!(
            tokens.metadata(WETH).await,
            Err(PositionError::Source(_))
        ));
    }

    #[test]
    fn test_event_topics() {
        assert_eq!(
            PoolEvent::Swap.topic().to_string(),
            "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67"
        );
        assert_ne!(PoolEvent::Mint.topic(), PoolEvent::Burn.topic());

        let params = PoolEvent::Swap.subscription_params(POOL);
        assert_eq!(params[0], "logs");
        assert_eq!(
            params[1]["topics"][0][0],
            PoolEvent::Swap.topic().to_string()
        );
    }
}
