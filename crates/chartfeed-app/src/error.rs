//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] chartfeed_feed::FeedError),

    #[error("Stream error: {0}")]
    Stream(#[from] chartfeed_stream::StreamError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] chartfeed_gateway::GatewayError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] chartfeed_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
