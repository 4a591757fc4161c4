//! lpguard - stop-loss guard for a concentrated liquidity position.
//!
//! Watches the pool over a WebSocket feed, re-evaluates the position on every
//! configured pool event, and withdraws then sells when thresholds are crossed.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Stop-loss guard for a Uniswap v3 liquidity position
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via LPGUARD_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Observe only: compute and log thresholds, never withdraw or swap
    #[arg(long)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    lpguard_ws::init_crypto();

    let args = Args::parse();

    // Determine config path: CLI arg > LPGUARD_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("LPGUARD_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let mut config = lpguard_bot::AppConfig::from_file(&config_path)?;
    if args.test_mode {
        config.risk.test_mode = true;
    }

    lpguard_telemetry::init_logging(Some(&config.telemetry.log_level))?;

    info!("Starting lpguard v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        position_id = config.position_id,
        test_mode = config.risk.test_mode,
        "Configuration loaded"
    );

    let app = lpguard_bot::Application::new(config)?;
    let summary = app.run().await?;

    info!(
        evaluations = summary.evaluations,
        failures = summary.failures,
        "Stopped"
    );
    Ok(())
}
