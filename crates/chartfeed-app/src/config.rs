//! Application configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.

use crate::error::{AppError, AppResult};
use chartfeed_feed::FeedConfig;
use chartfeed_gateway::GatewayConfig;
use chartfeed_stream::WsClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CHARTFEED_CONFIG";
/// Environment variable that supplies or overrides the upstream credential.
pub const API_KEY_ENV: &str = "CHARTFEED_API_KEY";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Upstream socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Upstream socket URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:9000/ws".to_string()
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl StreamConfig {
    pub fn client_config(&self, api_key: Option<String>) -> WsClientConfig {
        WsClientConfig {
            url: self.url.clone(),
            api_key,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.reconnect_max_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
        }
    }
}

impl AppConfig {
    /// Resolve the config path (CLI argument, then `CHARTFEED_CONFIG`, then
    /// the default path), load it, and apply environment overrides.
    ///
    /// A missing default file yields the built-in defaults; a missing file
    /// that was asked for explicitly is an error.
    pub fn load(cli_path: Option<String>) -> AppResult<Self> {
        let explicit = cli_path.or_else(|| std::env::var(CONFIG_PATH_ENV).ok());
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            None => {
                tracing::warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
                Self::default()
            }
        };
        config.apply_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Replace the upstream credential when a non-empty key is given.
    pub fn apply_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.feed.api_key = Some(key.trim().to_string());
        }
    }

    /// Upstream credential, if configured.
    pub fn api_key(&self) -> Option<&str> {
        self.feed.api_key.as_deref().filter(|k| !k.is_empty())
    }
}
