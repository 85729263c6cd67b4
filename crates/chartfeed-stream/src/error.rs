//! Stream transport error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Stream endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
