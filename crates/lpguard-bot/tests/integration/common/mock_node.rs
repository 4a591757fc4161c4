//! Mock Ethereum node for integration tests.
//!
//! Serves the JSON-RPC subset the bot uses over WebSocket:
//! - `eth_subscribe` acknowledged with a per-connection id
//! - `eth_call` answered from a scripted factory, pool, position manager and tokens
//! - Swap log notifications pushed on demand to every live subscription

use alloy::primitives::{Address, I256, U256};
use alloy::sol_types::{SolCall, SolValue};
use futures_util::{SinkExt, StreamExt};
use lpguard_bot::rpc::{
    IERC20Metadata, INonfungiblePositionManager, IUniswapV3Factory, IUniswapV3Pool,
};
use lpguard_bot::PoolEvent;
use lpguard_core::sqrt_ratio_at_tick;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const POOL: Address = Address::repeat_byte(0x11);
pub const MANAGER: Address = Address::repeat_byte(0x22);
pub const FACTORY: Address = Address::repeat_byte(0xfa);
pub const WETH: Address = Address::repeat_byte(0xee);
pub const DAI: Address = Address::repeat_byte(0xda);

/// On-chain state the node reports.
#[derive(Debug, Clone)]
pub struct Chain {
    pub tick: i32,
    pub pool_token0: Address,
    pub pool_token1: Address,
    pub position_token0: Address,
    pub position_token1: Address,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub fee: u32,
    pub liquidity: u128,
}

impl Chain {
    /// WETH/DAI 0.3% position over roughly 992 to 1997 DAI per WETH.
    pub fn weth_dai(tick: i32) -> Self {
        Self {
            tick,
            pool_token0: WETH,
            pool_token1: DAI,
            position_token0: WETH,
            position_token1: DAI,
            tick_lower: 69_000,
            tick_upper: 76_000,
            fee: 3000,
            liquidity: 1_000_000_000_000_000_000,
        }
    }
}

pub struct MockNode {
    addr: SocketAddr,
    chain: Arc<Mutex<Chain>>,
    methods: Arc<Mutex<Vec<String>>>,
    swaps: broadcast::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl MockNode {
    pub async fn start(chain: Chain) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let chain = Arc::new(Mutex::new(chain));
        let methods: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let (swaps, _) = broadcast::channel(16);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let chain_clone = chain.clone();
        let methods_clone = methods.clone();
        let swaps_clone = swaps.clone();

        tokio::spawn(async move {
            let mut connection = 0u32;
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        connection += 1;
                        tokio::spawn(handle_connection(
                            stream,
                            connection,
                            chain_clone.clone(),
                            methods_clone.clone(),
                            swaps_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            chain,
            methods,
            swaps,
            shutdown_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn set_tick(&self, tick: i32) {
        self.chain.lock().await.tick = tick;
    }

    /// Emit one Swap log on every subscription.
    pub fn push_swap(&self) {
        let _ = self.swaps.send(());
    }

    /// Number of requests received with `method`.
    pub async fn count(&self, method: &str) -> usize {
        self.methods
            .lock()
            .await
            .iter()
            .filter(|m| *m == method)
            .count()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: u32,
    chain: Arc<Mutex<Chain>>,
    methods: Arc<Mutex<Vec<String>>>,
    mut swaps: broadcast::Receiver<()>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();
    let mut subscriptions: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => continue,
                };
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let id = request["id"].clone();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                methods.lock().await.push(method.clone());

                let reply = match method.as_str() {
                    "eth_subscribe" => {
                        let server_id = format!("0x{connection:02x}{:02x}", subscriptions.len() + 1);
                        subscriptions.push(server_id.clone());
                        json!({"jsonrpc": "2.0", "id": id, "result": server_id})
                    }
                    "eth_call" => {
                        let chain = chain.lock().await.clone();
                        match answer_call(&chain, &request["params"]) {
                            Some(data) => json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": format!("0x{}", hex::encode(data)),
                            }),
                            None => json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "error": {"code": -32000, "message": "execution reverted"},
                            }),
                        }
                    }
                    _ => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "method not found"},
                    }),
                };
                if write.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
            Ok(()) = swaps.recv() => {
                for server_id in &subscriptions {
                    let note = json!({
                        "jsonrpc": "2.0",
                        "method": "eth_subscription",
                        "params": {
                            "subscription": server_id,
                            "result": {
                                "address": POOL.to_string(),
                                "topics": [PoolEvent::Swap.topic().to_string()],
                                "data": "0x",
                                "blockNumber": "0x1",
                                "transactionHash": format!("0x{}", "ab".repeat(32)),
                            }
                        }
                    });
                    let _ = write.send(Message::Text(note.to_string())).await;
                }
            }
        }
    }
}

fn answer_call(chain: &Chain, params: &Value) -> Option<Vec<u8>> {
    let to = params[0]["to"].as_str()?.to_lowercase();
    let data = hex::decode(params[0]["data"].as_str()?.trim_start_matches("0x")).ok()?;
    let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let is = |address: Address| to == address.to_string().to_lowercase();

    if is(POOL) {
        if selector == IUniswapV3Pool::slot0Call::SELECTOR {
            let sqrt = sqrt_ratio_at_tick(chain.tick).ok()?;
            let tick = I256::try_from(chain.tick).ok()?;
            return Some((sqrt, tick, 0u16, 1u16, 1u16, U256::ZERO, true).abi_encode_params());
        }
        if selector == IUniswapV3Pool::token0Call::SELECTOR {
            return Some(chain.pool_token0.abi_encode());
        }
        if selector == IUniswapV3Pool::token1Call::SELECTOR {
            return Some(chain.pool_token1.abi_encode());
        }
        return None;
    }
    if is(FACTORY) && selector == IUniswapV3Factory::getPoolCall::SELECTOR {
        let call = IUniswapV3Factory::getPoolCall::abi_decode(&data, true).ok()?;
        let pair = [chain.pool_token0, chain.pool_token1];
        let known = pair.contains(&call.tokenA)
            && pair.contains(&call.tokenB)
            && u32::try_from(call.fee).ok()? == chain.fee;
        let pool = if known { POOL } else { Address::ZERO };
        return Some(pool.abi_encode());
    }
    if is(MANAGER) && selector == INonfungiblePositionManager::positionsCall::SELECTOR {
        return Some(
            (
                U256::ZERO,
                Address::ZERO,
                chain.position_token0,
                chain.position_token1,
                U256::from(chain.fee),
                I256::try_from(chain.tick_lower).ok()?,
                I256::try_from(chain.tick_upper).ok()?,
                U256::from(chain.liquidity),
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
            )
                .abi_encode_params(),
        );
    }

    let symbol = if is(WETH) {
        "WETH"
    } else if is(DAI) {
        "DAI"
    } else {
        return None;
    };
    if selector == IERC20Metadata::decimalsCall::SELECTOR {
        Some(U256::from(18u8).abi_encode())
    } else if selector == IERC20Metadata::symbolCall::SELECTOR {
        Some(symbol.to_string().abi_encode())
    } else if selector == IERC20Metadata::nameCall::SELECTOR {
        Some(format!("{symbol} token").abi_encode())
    } else {
        None
    }
}
