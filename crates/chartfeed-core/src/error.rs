//! Error types for chartfeed-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    #[error("Invalid currency mode: {0}")]
    InvalidCurrency(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
