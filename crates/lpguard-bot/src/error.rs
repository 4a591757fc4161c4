//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<lpguard_ws::WsError>),

    #[error("Position error: {0}")]
    Position(#[from] lpguard_position::PositionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] lpguard_telemetry::TelemetryError),

    #[error("Event feed stopped: {0}")]
    FeedStopped(String),
}

impl From<lpguard_ws::WsError> for AppError {
    fn from(e: lpguard_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
