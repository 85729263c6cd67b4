//! Feed error types.
//!
//! `FeedError` is `Clone`: one in-flight history result is shared by every
//! deduplicated awaiter.

use chartfeed_core::CoreError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("{0}")]
    Http(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("No async runtime: {0}")]
    Runtime(String),
}

impl From<CoreError> for FeedError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidResolution(r) => Self::InvalidResolution(r),
            other => Self::Parse(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        Self::HttpClient(e.to_string())
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
