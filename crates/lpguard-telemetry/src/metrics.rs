//! Prometheus metrics for lpguard.
//!
//! Covers:
//! - Risk evaluations by outcome, failures by kind, evaluation latency
//! - Last observed price, thresholds and risk phase
//! - Event feed connection state and reconnects
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, Histogram, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Evaluations by outcome.
/// Labels: outcome (skipped/no_action/dry_run/exited/sold/failed)
pub static EVALUATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lpguard_evaluations_total",
        "Risk evaluations by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Failed evaluations by error kind.
/// Labels: kind (config/source/executor/math/transition)
pub static EVALUATION_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lpguard_evaluation_failures_total",
        "Failed risk evaluations by error kind",
        &["kind"]
    )
    .unwrap()
});

/// Wall time of completed evaluations in milliseconds.
pub static EVALUATION_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "lpguard_evaluation_latency_ms",
        "Risk evaluation latency in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Last observed pool price in the evaluation's quoting direction.
pub static LAST_PRICE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "lpguard_last_price",
        "Last observed pool price (quote per base)"
    )
    .unwrap()
});

/// Last computed thresholds.
/// Labels: kind (exit/stop_loss/dump)
pub static THRESHOLD_PRICE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "lpguard_threshold_price",
        "Last computed decision thresholds",
        &["kind"]
    )
    .unwrap()
});

/// Risk phase (0 = active, 1 = exited, 2 = sold).
pub static RISK_PHASE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "lpguard_risk_phase",
        "Risk phase (0=active, 1=exited, 2=sold)"
    )
    .unwrap()
});

/// Event feed connection state (1 = connected, 0 = disconnected).
pub static FEED_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "lpguard_feed_connected",
        "Event feed connection state (1=connected)"
    )
    .unwrap()
});

/// Event feed reconnects.
/// Labels: reason (close code or error kind)
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lpguard_feed_reconnect_total",
        "Event feed reconnects by reason",
        &["reason"]
    )
    .unwrap()
});

/// Pool events received from the feed.
/// Labels: event (Swap/Mint/Burn)
pub static POOL_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lpguard_pool_events_total",
        "Pool log events received",
        &["event"]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record an evaluation outcome.
    pub fn evaluation(outcome: &str) {
        EVALUATIONS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a failed evaluation.
    pub fn evaluation_failed(kind: &str) {
        EVALUATIONS_TOTAL.with_label_values(&["failed"]).inc();
        EVALUATION_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn evaluation_latency(latency_ms: f64) {
        EVALUATION_LATENCY_MS.observe(latency_ms);
    }

    /// Record the price and thresholds seen by an evaluation.
    pub fn observed(price: f64, exit: f64, stop_loss: f64, dump: f64) {
        LAST_PRICE.set(price);
        THRESHOLD_PRICE.with_label_values(&["exit"]).set(exit);
        THRESHOLD_PRICE.with_label_values(&["stop_loss"]).set(stop_loss);
        THRESHOLD_PRICE.with_label_values(&["dump"]).set(dump);
    }

    pub fn risk_phase(phase: i64) {
        RISK_PHASE.set(phase);
    }

    /// Record feed connected.
    pub fn feed_connected() {
        FEED_CONNECTED.set(1.0);
    }

    /// Record feed disconnected.
    pub fn feed_disconnected() {
        FEED_CONNECTED.set(0.0);
    }

    /// Record feed reconnection.
    pub fn feed_reconnect(reason: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn pool_event(event: &str) {
        POOL_EVENTS_TOTAL.with_label_values(&[event]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
