//! Prometheus metrics and structured logging for lpguard.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus counters and gauges for evaluations and the event feed
//! - Text rendering of the registry for the shutdown summary

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
