//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Stream gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent event-stream connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Route of the stream endpoint.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    /// Origins allowed by CORS (empty = any origin).
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Frames queued per connection before new upstream frames are dropped.
    #[serde(default = "default_relay_buffer")]
    pub relay_buffer: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    256
}

fn default_relay_buffer() -> usize {
    1024
}

fn default_stream_path() -> String {
    "/api/stream".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_connections: default_max_connections(),
            stream_path: default_stream_path(),
            allowed_origins: Vec::new(),
            relay_buffer: default_relay_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_section() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.stream_path, "/api/stream");
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.relay_buffer, 1024);
    }
}
