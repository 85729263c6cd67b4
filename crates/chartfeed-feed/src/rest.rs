//! REST client for the history and trade providers.

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::provider::{BarProvider, HistoryRequest, TradeProvider, TradeRequest};
use async_trait::async_trait;
use chartfeed_core::{RawBar, Trade};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Envelope of every provider response.
#[derive(Debug, Deserialize)]
struct DataEnvelope {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// HTTP client for `/market/history` and `/market/trades`.
pub struct HistoryClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HistoryClient {
    pub fn new(config: &FeedConfig) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| FeedError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.rest_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.header(reqwest::header::AUTHORIZATION, key),
            None => request,
        }
    }

    /// Send and decode `{ "data": [...] }`, skipping entries that do not parse.
    async fn fetch_data<T: DeserializeOwned>(&self, request: RequestBuilder) -> FeedResult<Vec<T>> {
        let response = request
            .send()
            .await
            .map_err(|e| FeedError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Http(format!("HTTP {}: {body}", status.as_u16())));
        }

        let envelope: DataEnvelope = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(format!("Failed to parse response: {e}")))?;

        let total = envelope.data.len();
        let items: Vec<T> = envelope
            .data
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable entry");
                    None
                }
            })
            .collect();
        debug!(total, parsed = items.len(), "Provider response decoded");
        Ok(items)
    }
}

#[async_trait]
impl BarProvider for HistoryClient {
    async fn fetch_bars(&self, request: HistoryRequest) -> FeedResult<Vec<RawBar>> {
        let query = [
            ("asset", request.asset.clone()),
            ("chain", request.chain.clone()),
            ("period", request.resolution.period().to_string()),
            ("from", request.from.to_string()),
            ("to", request.to.to_string()),
            ("amount", request.count_back.to_string()),
            ("usd", request.is_usd.to_string()),
        ];
        debug!(asset = %request.asset, period = request.resolution.period(), "Fetching bars");
        self.fetch_data(self.get("/market/history").query(&query)).await
    }
}

#[async_trait]
impl TradeProvider for HistoryClient {
    async fn fetch_trades(&self, request: TradeRequest) -> FeedResult<Vec<Trade>> {
        let query = [
            ("asset", request.asset.clone()),
            ("chain", request.chain.clone()),
            ("from", request.from.to_string()),
            ("to", request.to.to_string()),
            ("maker", request.maker.clone()),
        ];
        debug!(asset = %request.asset, maker = %request.maker, "Fetching trades");
        self.fetch_data(self.get("/market/trades").query(&query)).await
    }
}
