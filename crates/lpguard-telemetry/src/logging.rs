//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a configured level is set.
pub const DEFAULT_FILTER: &str = "info,lpguard=debug";

/// Initialize structured logging.
///
/// `RUST_LOG` wins over `default_filter`. JSON output when
/// `RUST_ENV=production`, pretty output otherwise. Fails if a global
/// subscriber is already installed.
pub fn init_logging(default_filter: Option<&str>) -> TelemetryResult<()> {
    let fallback = default_filter.unwrap_or(DEFAULT_FILTER);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid filter {fallback:?}: {e}")))?;

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(Some("warn"));
        assert!(matches!(
            init_logging(Some("warn")),
            Err(TelemetryError::LoggingInit(_))
        ));
    }
}
