//! Application lifecycle integration tests.
//!
//! Tests the full path from feed to executor:
//! - Startup evaluation exits a position already below its exit price
//! - A pool event triggers the sale once the stop-loss is crossed
//! - Test mode observes without acting
//! - Pool looked up through the factory when none is configured
//! - Configuration errors abort startup

mod integration;
use integration::common::mock_node::{Chain, MockNode, DAI, FACTORY, MANAGER, POOL, WETH};

use lpguard_bot::{AppConfig, AppError, Application, WsConfig};
use lpguard_core::Address;
use lpguard_position::{ExecutorCallKind, MockExecutor, PositionError, RiskPhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// Below the default exit (about 1394) but above the stop-loss (about 1294).
const TICK_BELOW_EXIT: i32 = 72_000;
/// About 1211, under the stop-loss.
const TICK_BELOW_STOP: i32 = 71_000;

fn config(url: String) -> AppConfig {
    AppConfig {
        ws_url: url,
        position_id: 42,
        pool_address: POOL.to_string(),
        position_manager_address: MANAGER.to_string(),
        websocket: WsConfig {
            request_timeout_ms: 2_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn test_startup_exit_then_sell_on_swap_event() {
    let node = MockNode::start(Chain::weth_dai(TICK_BELOW_EXIT)).await;
    let executor = Arc::new(MockExecutor::new());
    let app = Application::with_executor(config(node.url()), executor.clone()).unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(app.run_with_shutdown(async move {
        let _ = stop_rx.await;
    }));

    // Startup evaluation withdraws and collects, then holds inside the band
    wait_until("startup exit", || {
        executor.count(ExecutorCallKind::CollectFees) == 1
    })
    .await;
    assert_eq!(executor.count(ExecutorCallKind::Withdraw), 1);
    assert_eq!(executor.count(ExecutorCallKind::Swap), 0);
    assert!(node.count("eth_subscribe").await >= 1);

    node.set_tick(TICK_BELOW_STOP).await;
    node.push_swap();

    wait_until("stop-loss sale", || {
        executor.count(ExecutorCallKind::Swap) == 1
    })
    .await;
    let swap = executor.swaps().remove(0);
    assert_eq!(swap.token_in, WETH);
    assert_eq!(swap.token_out, DAI);
    assert_eq!(swap.fee, 3000);
    assert!(swap.amount_in.is_positive());

    stop_tx.send(()).unwrap();
    let summary = timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown timed out")
        .unwrap()
        .unwrap();

    assert!(summary.notifications >= 1);
    assert!(summary.evaluations >= 2);
    let status = summary.status.unwrap();
    assert!(matches!(status.phase, RiskPhase::Sold { .. }));
    assert_eq!(executor.count(ExecutorCallKind::Withdraw), 1);

    node.shutdown().await;
}

#[tokio::test]
async fn test_test_mode_observes_only() {
    let node = MockNode::start(Chain::weth_dai(TICK_BELOW_STOP)).await;
    let executor = Arc::new(MockExecutor::new());
    let mut config = config(node.url());
    config.risk.test_mode = true;
    let app = Application::with_executor(config, executor.clone()).unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(app.run_with_shutdown(async move {
        let _ = stop_rx.await;
    }));

    // 10 reads to initialize, 2 more for the startup refresh
    timeout(Duration::from_secs(5), async {
        while node.count("eth_call").await < 12 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("startup evaluation never refreshed");

    stop_tx.send(()).unwrap();
    let summary = timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown timed out")
        .unwrap()
        .unwrap();

    assert_eq!(summary.evaluations, 1);
    assert!(executor.calls().is_empty());
    let status = summary.status.unwrap();
    assert_eq!(status.phase, RiskPhase::Active);
    assert!(status.thresholds.is_some());

    node.shutdown().await;
}

#[tokio::test]
async fn test_pool_resolved_through_factory() {
    let node = MockNode::start(Chain::weth_dai(TICK_BELOW_EXIT)).await;
    let executor = Arc::new(MockExecutor::new());
    let config = AppConfig {
        pool_address: String::new(),
        factory_address: FACTORY.to_string(),
        ..config(node.url())
    };
    let app = Application::with_executor(config, executor.clone()).unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(app.run_with_shutdown(async move {
        let _ = stop_rx.await;
    }));

    wait_until("startup exit", || {
        executor.count(ExecutorCallKind::CollectFees) == 1
    })
    .await;
    assert_eq!(node.count("eth_subscribe").await, 1);

    // The subscription made after the lookup delivers pool events
    node.set_tick(TICK_BELOW_STOP).await;
    node.push_swap();
    wait_until("stop-loss sale", || {
        executor.count(ExecutorCallKind::Swap) == 1
    })
    .await;

    stop_tx.send(()).unwrap();
    let summary = timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown timed out")
        .unwrap()
        .unwrap();
    assert!(summary.notifications >= 1);

    node.shutdown().await;
}

#[tokio::test]
async fn test_unknown_pool_aborts_startup() {
    // No WETH/DAI pool deployed
    let chain = Chain {
        pool_token1: Address::repeat_byte(0x33),
        ..Chain::weth_dai(TICK_BELOW_EXIT)
    };
    let node = MockNode::start(chain).await;
    let config = AppConfig {
        pool_address: String::new(),
        factory_address: FACTORY.to_string(),
        ..config(node.url())
    };
    let app = Application::with_executor(config, Arc::new(MockExecutor::new())).unwrap();

    let result = timeout(
        Duration::from_secs(10),
        app.run_with_shutdown(std::future::pending()),
    )
    .await
    .expect("startup should fail fast");

    assert!(matches!(
        result,
        Err(AppError::Position(PositionError::Config(_)))
    ));

    node.shutdown().await;
}

#[tokio::test]
async fn test_pair_mismatch_aborts_startup() {
    let chain = Chain {
        pool_token1: Address::repeat_byte(0x33),
        ..Chain::weth_dai(73_000)
    };
    let node = MockNode::start(chain).await;
    let app = Application::with_executor(config(node.url()), Arc::new(MockExecutor::new()))
        .unwrap();

    let result = timeout(
        Duration::from_secs(10),
        app.run_with_shutdown(std::future::pending()),
    )
    .await
    .expect("startup should fail fast");

    assert!(matches!(
        result,
        Err(AppError::Position(PositionError::Config(_)))
    ));

    node.shutdown().await;
}
