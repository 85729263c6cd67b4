//! Gateway error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Invalid CORS origin: {0}")]
    InvalidOrigin(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
