//! Main application orchestration.
//!
//! Coordinates all components:
//! - Event feed connection and pool log subscriptions
//! - Pool lookup through the factory when no pool is configured
//! - RPC-backed position state
//! - Startup evaluation, then one evaluation per pool event
//! - Graceful shutdown with in-flight evaluations drained

use crate::config::{AppConfig, PoolEvent};
use crate::error::{AppError, AppResult};
use crate::executor::LoggingExecutor;
use crate::rpc::{data_sources, resolve_pool_address, EthCallClient};
use lpguard_position::{
    DynExecutor, EvaluateOptions, EvaluationOutcome, PositionResult, PositionStatus,
    RiskDecisionEngine,
};
use lpguard_core::Address;
use lpguard_telemetry::Metrics;
use lpguard_ws::{EventFeed, FeedEvent, WsResult, ABNORMAL_CLOSE, NORMAL_CLOSE};
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Feed event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How long the feed gets to close after shutdown is requested.
const FEED_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters reported when the application stops.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub notifications: u64,
    pub evaluations: u64,
    pub skipped: u64,
    pub failures: u64,
    pub reconnects: u64,
    /// Position status at exit; `None` if initialization never finished.
    pub status: Option<PositionStatus>,
}

impl RunSummary {
    fn record(&mut self, result: PositionResult<EvaluationOutcome>) {
        match result {
            Ok(EvaluationOutcome::Skipped) => self.skipped += 1,
            Ok(EvaluationOutcome::Completed(_)) => self.evaluations += 1,
            // The engine has already logged the failure with its context
            Err(_) => self.failures += 1,
        }
    }

    fn record_join(&mut self, joined: Result<PositionResult<EvaluationOutcome>, JoinError>) {
        match joined {
            Ok(result) => self.record(result),
            Err(e) => {
                error!(error = %e, "Evaluation task panicked");
                self.failures += 1;
            }
        }
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    executor: DynExecutor,
}

impl Application {
    /// Create a new application with the dry-run executor.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        Self::with_executor(config, Arc::new(LoggingExecutor::new()))
    }

    pub fn with_executor(config: AppConfig, executor: DynExecutor) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<RunSummary> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves, the feed stops, or startup fails.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> AppResult<RunSummary>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let configured_pool = self.config.pool_address()?;
        let manager_address = self.config.position_manager_address()?;
        let factory_address = self.config.factory_address()?;
        let exit_fraction = self.config.risk.exit_fraction;
        let options = self.config.risk.evaluate_options();

        info!(
            position_id = self.config.position_id,
            pool = ?configured_pool,
            %exit_fraction,
            test_mode = options.test_mode,
            counter_dump_protection = options.counter_dump_protection,
            "Starting application"
        );

        // Create event channel and feed
        let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(EVENT_CHANNEL_CAPACITY);
        let feed_config = self.config.websocket.feed_config(&self.config.ws_url);
        let feed = Arc::new(EventFeed::new(feed_config, event_tx));

        // A known pool is subscribed before the first connection
        if let Some(pool) = configured_pool {
            for event in &self.config.events {
                feed.subscribe(event.name(), event.subscription_params(pool));
            }
        }

        // Spawn feed task
        let feed_clone = feed.clone();
        let mut feed_task: JoinHandle<WsResult<()>> =
            tokio::spawn(async move { feed_clone.run().await });

        let client = EthCallClient::new(
            Arc::new(feed.handle()),
            self.config.websocket.request_timeout(),
        );
        let mut summary = RunSummary::default();

        let pool_address = match configured_pool {
            Some(pool) => pool,
            None => {
                let resolved = tokio::select! {
                    result = resolve_and_subscribe(
                        &feed,
                        &client,
                        &self.config.events,
                        factory_address,
                        manager_address,
                        self.config.position_id,
                    ) => Some(result),
                    () = &mut shutdown => None,
                };
                match resolved {
                    Some(Ok(pool)) => pool,
                    Some(Err(e)) => {
                        error!(error = %e, "Pool lookup failed");
                        stop_feed(&feed, feed_task).await;
                        return Err(e);
                    }
                    None => {
                        info!("Shutdown requested during pool lookup");
                        stop_feed(&feed, feed_task).await;
                        return Ok(summary);
                    }
                }
            }
        };
        info!(
            pool = %pool_address,
            events = ?self.config.events.iter().map(|e| e.name()).collect::<Vec<_>>(),
            "Configured pool event subscriptions"
        );
        let sources = data_sources(client, pool_address, manager_address);

        let initialized = tokio::select! {
            result = RiskDecisionEngine::initialize(
                self.config.position_id,
                sources,
                self.executor.clone(),
                self.config.risk.engine_config(),
            ) => Some(result),
            () = &mut shutdown => None,
        };
        let engine = match initialized {
            Some(Ok(engine)) => Arc::new(engine),
            Some(Err(e)) => {
                error!(error = %e, "Position initialization failed");
                stop_feed(&feed, feed_task).await;
                return Err(e.into());
            }
            None => {
                info!("Shutdown requested during initialization");
                stop_feed(&feed, feed_task).await;
                return Ok(summary);
            }
        };

        // Startup evaluation before the first event
        match engine.evaluate(exit_fraction, &options).await {
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Startup evaluation failed with a configuration error");
                stop_feed(&feed, feed_task).await;
                return Err(e.into());
            }
            result => summary.record(result),
        }

        // Main event loop
        info!("Entering main event loop");
        let mut tasks: JoinSet<PositionResult<EvaluationOutcome>> = JoinSet::new();
        let mut last_close_code = None;
        let mut feed_result = None;

        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    let trigger = match event {
                        FeedEvent::Connected { reconnect } => {
                            Metrics::feed_connected();
                            if reconnect {
                                summary.reconnects += 1;
                                Metrics::feed_reconnect(reconnect_reason(last_close_code));
                                info!("Feed reconnected, re-evaluating");
                            }
                            reconnect
                        }
                        FeedEvent::Disconnected { code, reason } => {
                            Metrics::feed_disconnected();
                            warn!(code, reason = %reason, "Feed disconnected");
                            last_close_code = Some(code);
                            false
                        }
                        FeedEvent::Notification { label, payload, .. } => {
                            summary.notifications += 1;
                            Metrics::pool_event(&label);
                            debug!(
                                event = %label,
                                tx = payload.get("transactionHash").and_then(|v| v.as_str()),
                                block = payload.get("blockNumber").and_then(|v| v.as_str()),
                                "Pool event"
                            );
                            true
                        }
                    };
                    if trigger {
                        spawn_evaluation(&mut tasks, &engine, exit_fraction, options);
                    }
                }

                Some(joined) = tasks.join_next() => {
                    summary.record_join(joined);
                }

                result = &mut feed_task => {
                    feed_result = Some(result);
                    break;
                }

                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Cleanup: let in-flight evaluations finish while the feed can still
        // answer their reads, then close the feed.
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight evaluations");
        }
        while let Some(joined) = tasks.join_next().await {
            summary.record_join(joined);
        }

        let feed_outcome = match feed_result {
            Some(result) => result,
            None => {
                feed.shutdown();
                match tokio::time::timeout(FEED_CLOSE_TIMEOUT, &mut feed_task).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Feed did not close in time, aborting");
                        feed_task.abort();
                        Ok(Ok(()))
                    }
                }
            }
        };

        let status = engine.status();
        summary.status = Some(status.clone());
        info!(
            notifications = summary.notifications,
            evaluations = summary.evaluations,
            skipped = summary.skipped,
            failures = summary.failures,
            reconnects = summary.reconnects,
            status = %serde_json::to_string(&status).unwrap_or_default(),
            "Shutting down"
        );
        match Metrics::render() {
            Ok(text) => info!("Final metrics:\n{text}"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }

        match feed_outcome {
            Ok(Ok(())) => Ok(summary),
            Ok(Err(e)) => {
                error!(error = %e, "Event feed stopped");
                Err(e.into())
            }
            Err(e) => Err(AppError::FeedStopped(format!("feed task failed: {e}"))),
        }
    }
}

/// Look the pool up through the factory and subscribe to its events on the
/// live connection.
async fn resolve_and_subscribe(
    feed: &EventFeed,
    client: &EthCallClient,
    events: &[PoolEvent],
    factory: Address,
    position_manager: Address,
    position_id: u64,
) -> AppResult<Address> {
    let pool = resolve_pool_address(client, factory, position_manager, position_id).await?;
    let handle = feed.handle();
    for event in events {
        handle
            .subscribe(event.name(), event.subscription_params(pool))
            .await?;
    }
    Ok(pool)
}

fn spawn_evaluation(
    tasks: &mut JoinSet<PositionResult<EvaluationOutcome>>,
    engine: &Arc<RiskDecisionEngine>,
    exit_fraction: Decimal,
    options: EvaluateOptions,
) {
    let engine = engine.clone();
    tasks.spawn(async move { engine.evaluate(exit_fraction, &options).await });
}

async fn stop_feed(feed: &EventFeed, feed_task: JoinHandle<WsResult<()>>) {
    feed.shutdown();
    if tokio::time::timeout(FEED_CLOSE_TIMEOUT, feed_task)
        .await
        .is_err()
    {
        warn!("Feed did not close in time");
    }
}

/// Metrics label for a reconnect, from the close that caused it.
fn reconnect_reason(code: Option<u16>) -> &'static str {
    match code {
        Some(ABNORMAL_CLOSE) => "abnormal_close",
        Some(NORMAL_CLOSE) => "normal_close",
        Some(1011) => "server_error",
        Some(_) => "close_frame",
        None => "unknown",
    }
}
