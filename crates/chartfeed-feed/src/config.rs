//! Feed configuration.

use chartfeed_core::Resolution;
use serde::{Deserialize, Serialize};

/// Which live transport the feed uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Chunked HTTP to the server-mode stream endpoint.
    #[default]
    Sse,
    /// Direct upstream socket.
    Socket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the REST history provider.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    /// Sent as `Authorization` on REST calls.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Bound on one history load.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long a completed price-mode request keeps absorbing duplicates.
    #[serde(default = "default_dedup_grace_ms")]
    pub dedup_grace_ms: u64,
    #[serde(default)]
    pub transport: TransportMode,
    /// Server-mode stream endpoint used in SSE mode.
    #[serde(default = "default_stream_endpoint")]
    pub stream_endpoint: String,
    #[serde(default = "default_supported_resolutions")]
    pub supported_resolutions: Vec<Resolution>,
    /// Cap on cached marks per scope; unbounded when unset.
    #[serde(default)]
    pub max_marks_per_scope: Option<usize>,
}

fn default_rest_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_dedup_grace_ms() -> u64 {
    500
}

fn default_stream_endpoint() -> String {
    "http://127.0.0.1:8080/api/stream".to_string()
}

fn default_supported_resolutions() -> Vec<Resolution> {
    Resolution::ALL.to_vec()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rest_base_url: default_rest_base_url(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            dedup_grace_ms: default_dedup_grace_ms(),
            transport: TransportMode::default(),
            stream_endpoint: default_stream_endpoint(),
            supported_resolutions: default_supported_resolutions(),
            max_marks_per_scope: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: FeedConfig = from_json("{}");
        assert_eq!(config.transport, TransportMode::Sse);
        assert_eq!(config.supported_resolutions.len(), Resolution::ALL.len());
        assert!(config.max_marks_per_scope.is_none());
        assert_eq!(config.dedup_grace_ms, 500);
    }

    #[test]
    fn test_partial_override() {
        let config: FeedConfig = from_json(
            r#"{"transport": "socket", "supported_resolutions": ["1", "60"], "max_marks_per_scope": 50}"#,
        );
        assert_eq!(config.transport, TransportMode::Socket);
        assert_eq!(
            config.supported_resolutions,
            vec![Resolution::Minute1, Resolution::Hour1]
        );
        assert_eq!(config.max_marks_per_scope, Some(50));
    }

    fn from_json(json: &str) -> FeedConfig {
        serde_json::from_str(json).unwrap()
    }
}
