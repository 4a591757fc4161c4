//! Stop-loss guard for concentrated liquidity positions.
//!
//! Main application that orchestrates all components:
//! - WebSocket event feed to the node
//! - Pool, position and token reads over `eth_call`
//! - Risk decision engine (exit, then sell)
//! - Dry-run transaction execution

pub mod app;
pub mod config;
pub mod error;
pub mod executor;
pub mod rpc;

pub use app::{Application, RunSummary};
pub use config::{AppConfig, PoolEvent, RiskConfig, TelemetryConfig, WsConfig};
pub use error::{AppError, AppResult};
pub use executor::LoggingExecutor;
pub use rpc::{data_sources, EthCallClient, JsonRpc, RpcPool, RpcPositionManager, RpcTokens};
