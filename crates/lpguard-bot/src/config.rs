//! Application configuration.

use crate::error::{AppError, AppResult};
use lpguard_core::Address;
use lpguard_position::{EngineConfig, EvaluateOptions};
use lpguard_ws::FeedConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Pool log event that triggers an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolEvent {
    Swap,
    Mint,
    Burn,
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Swap => "Swap",
            Self::Mint => "Mint",
            Self::Burn => "Burn",
        }
    }
}

impl std::fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8546".to_string()
}

/// Uniswap v3 NonfungiblePositionManager (same address on mainnet and Polygon).
fn default_position_manager_address() -> String {
    "0xC36442b4a4522E871399CD717aBDD847Ab11FE88".to_string()
}

/// Uniswap v3 factory, used to find the pool when none is configured.
fn default_factory_address() -> String {
    "0x1F98431c8aD98523631AE4a59f267346ea31F984".to_string()
}

fn default_events() -> Vec<PoolEvent> {
    vec![PoolEvent::Swap]
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Node WebSocket endpoint (`ws://` or `wss://`).
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// NFT id of the monitored position.
    #[serde(default)]
    pub position_id: u64,
    /// Pool the position provides liquidity to. Empty: look it up through
    /// the factory from the position's pair and fee.
    #[serde(default)]
    pub pool_address: String,
    #[serde(default = "default_position_manager_address")]
    pub position_manager_address: String,
    #[serde(default = "default_factory_address")]
    pub factory_address: String,
    /// Pool events that trigger an evaluation.
    #[serde(default = "default_events")]
    pub events: Vec<PoolEvent>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_exit_fraction() -> Decimal {
    Decimal::new(6, 1)
}

fn default_stop_loss_margin() -> Decimal {
    EngineConfig::default().stop_loss_margin
}

fn default_dump_factor() -> Decimal {
    EngineConfig::default().dump_factor
}

fn default_stable_symbols() -> Vec<String> {
    EngineConfig::default().stable_symbols
}

fn default_true() -> bool {
    true
}

/// Stop-loss configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of the range, from the top, at which liquidity is withdrawn.
    #[serde(default = "default_exit_fraction")]
    pub exit_fraction: Decimal,
    /// Extra fraction below the exit for the hard stop-loss.
    #[serde(default = "default_stop_loss_margin")]
    pub stop_loss_margin: Decimal,
    /// Impermanent-loss multiplier sizing the dump band.
    #[serde(default = "default_dump_factor")]
    pub dump_factor: Decimal,
    /// Observe only: compute and log, never withdraw or swap.
    #[serde(default)]
    pub test_mode: bool,
    /// Quote token0 per token1 instead of token1 per token0.
    #[serde(default)]
    pub inverse_quote: bool,
    /// Quote in whichever token is stable; overrides `inverse_quote`.
    #[serde(default)]
    pub auto_quote_stable: bool,
    /// Hold the withdrawn asset until the dump band or stop-loss is crossed.
    #[serde(default = "default_true")]
    pub counter_dump_protection: bool,
    #[serde(default = "default_stable_symbols")]
    pub stable_symbols: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            exit_fraction: default_exit_fraction(),
            stop_loss_margin: default_stop_loss_margin(),
            dump_factor: default_dump_factor(),
            test_mode: false,
            inverse_quote: false,
            auto_quote_stable: false,
            counter_dump_protection: true,
            stable_symbols: default_stable_symbols(),
        }
    }
}

impl RiskConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            stop_loss_margin: self.stop_loss_margin,
            dump_factor: self.dump_factor,
            stable_symbols: self.stable_symbols.clone(),
        }
    }

    pub fn evaluate_options(&self) -> EvaluateOptions {
        EvaluateOptions {
            test_mode: self.test_mode,
            inverse_quote: self.inverse_quote,
            auto_quote_stable: self.auto_quote_stable,
            counter_dump_protection: self.counter_dump_protection,
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_delay_ms() -> u64 {
    100
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

/// WebSocket configuration subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Maximum consecutive reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Deadline for a single `eth_call`, replays included.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: 0,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl WsConfig {
    pub fn feed_config(&self, url: &str) -> FeedConfig {
        FeedConfig {
            url: url.to_string(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay_ms: self.reconnect_delay_ms,
            reconnect_max_delay_ms: self.reconnect_max_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_log_level() -> String {
    lpguard_telemetry::logging::DEFAULT_FILTER.to_string()
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            position_id: 0,
            pool_address: String::new(),
            position_manager_address: default_position_manager_address(),
            factory_address: default_factory_address(),
            events: default_events(),
            risk: RiskConfig::default(),
            websocket: WsConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Check everything the application relies on before connecting.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "ws_url must be a ws:// or wss:// URL, got {:?}",
                self.ws_url
            )));
        }
        if self.position_id == 0 {
            return Err(AppError::Config("position_id must be set".to_string()));
        }
        self.pool_address()?;
        self.position_manager_address()?;
        self.factory_address()?;
        if self.events.is_empty() {
            return Err(AppError::Config(
                "events must name at least one pool event".to_string(),
            ));
        }

        let risk = &self.risk;
        if risk.exit_fraction <= Decimal::ZERO || risk.exit_fraction >= Decimal::ONE {
            return Err(AppError::Config(format!(
                "risk.exit_fraction must be in (0, 1), got {}",
                risk.exit_fraction
            )));
        }
        if risk.exit_fraction + risk.stop_loss_margin > Decimal::ONE {
            return Err(AppError::Config(format!(
                "risk.exit_fraction + risk.stop_loss_margin must not exceed 1, got {} + {}",
                risk.exit_fraction, risk.stop_loss_margin
            )));
        }
        if risk.auto_quote_stable && risk.stable_symbols.is_empty() {
            return Err(AppError::Config(
                "risk.auto_quote_stable needs at least one stable symbol".to_string(),
            ));
        }
        risk.engine_config()
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        if self.websocket.heartbeat_timeout_ms == 0 || self.websocket.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "websocket heartbeat interval and timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured pool, `None` when it should be resolved through the factory.
    pub fn pool_address(&self) -> AppResult<Option<Address>> {
        if self.pool_address.trim().is_empty() {
            return Ok(None);
        }
        parse_address("pool_address", &self.pool_address).map(Some)
    }

    pub fn position_manager_address(&self) -> AppResult<Address> {
        parse_address("position_manager_address", &self.position_manager_address)
    }

    pub fn factory_address(&self) -> AppResult<Address> {
        parse_address("factory_address", &self.factory_address)
    }
}

fn parse_address(field: &str, value: &str) -> AppResult<Address> {
    Address::from_str(value)
        .map_err(|e| AppError::Config(format!("{field} {value:?} is not an address: {e}")))
}
