//! Application wiring.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use chartfeed_core::{Bar, Metric, Resolution, SettingsSnapshot};
use chartfeed_feed::{Datafeed, DatafeedContext, HistoryClient, PeriodParams, TransportMode};
use chartfeed_gateway::{run_server, AppState};
use chartfeed_stream::{
    SocketClient, SocketTransport, SseConfig, SseTransport, StreamTransport, WsStreamClient,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Bars requested when `watch` starts.
const WATCH_HISTORY_BARS: u32 = 300;

/// What `watch` shows.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub asset: String,
    pub chain: String,
    pub symbol: Option<String>,
    pub resolution: Resolution,
    pub metric: Metric,
    pub quote: bool,
    pub supply: Option<f64>,
    pub marks_filter: Option<String>,
}

impl WatchOptions {
    fn settings(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            is_usd: !self.quote,
            metric: self.metric,
            circulating_supply: self.supply.unwrap_or(0.0),
            ..Default::default()
        }
    }
}

pub struct Application {
    config: AppConfig,
}

/// Upstream socket client and the task running its connection loop.
struct Upstream {
    client: Arc<WsStreamClient>,
    task: JoinHandle<()>,
}

impl Upstream {
    fn spawn(client: Arc<WsStreamClient>) -> Self {
        let runner = client.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                error!(error = %e, "Upstream socket stopped");
            }
        });
        Self { client, task }
    }

    async fn stop(self) {
        self.client.shutdown();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Upstream task ended abnormally");
        }
    }
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn upstream_client(&self) -> Option<Arc<WsStreamClient>> {
        let key = self.config.api_key()?;
        let client_config = self.config.stream.client_config(Some(key.to_string()));
        Some(Arc::new(WsStreamClient::new(client_config)))
    }

    /// Transport selected by `feed.transport`. Socket mode needs the upstream
    /// credential and returns the client whose loop must be kept running.
    pub fn build_transport(
        &self,
    ) -> AppResult<(Arc<dyn StreamTransport>, Option<Arc<WsStreamClient>>)> {
        match self.config.feed.transport {
            TransportMode::Sse => {
                let transport =
                    SseTransport::new(SseConfig::new(self.config.feed.stream_endpoint.clone()))?;
                Ok((Arc::new(transport), None))
            }
            TransportMode::Socket => {
                let client = self.upstream_client().ok_or_else(|| {
                    AppError::Config(
                        "socket transport requires an API key (feed.api_key or CHARTFEED_API_KEY)"
                            .to_string(),
                    )
                })?;
                let transport = SocketTransport::new(client.clone() as Arc<dyn SocketClient>);
                Ok((Arc::new(transport), Some(client)))
            }
        }
    }

    /// Run the stream gateway until Ctrl-C.
    pub async fn serve(self) -> AppResult<()> {
        let upstream = self.upstream_client().map(Upstream::spawn);
        if upstream.is_none() {
            warn!("No upstream credential configured; stream requests will be rejected");
        }

        let state = AppState::new(
            upstream
                .as_ref()
                .map(|u| u.client.clone() as Arc<dyn SocketClient>),
            self.config.gateway.clone(),
        );
        let result = run_server(state, shutdown_signal()).await;

        if let Some(upstream) = upstream {
            upstream.stop().await;
        }
        result.map_err(AppError::from)
    }

    /// Load recent history, then print live bars as JSON lines until Ctrl-C.
    pub async fn watch(self, options: WatchOptions) -> AppResult<()> {
        let history = Arc::new(HistoryClient::new(&self.config.feed)?);
        let (transport, client) = self.build_transport()?;
        let upstream = client.map(Upstream::spawn);

        let mut context = DatafeedContext::new(
            &options.asset,
            &options.chain,
            options.symbol.clone().unwrap_or_else(|| options.asset.clone()),
        );
        context.settings = options.settings();
        context.marks_filter = options.marks_filter.clone();

        let feed = Datafeed::new(
            self.config.feed.clone(),
            context,
            history.clone(),
            history,
            transport,
        );

        let to = chrono::Utc::now().timestamp();
        let from = to - options.resolution.seconds() * i64::from(WATCH_HISTORY_BARS);
        let params = PeriodParams {
            from,
            to,
            count_back: WATCH_HISTORY_BARS,
            first_data_request: true,
        };
        let loaded = feed.fetch_history(options.resolution, params).await?;
        info!(bars = loaded.bars.len(), resolution = %options.resolution, "History loaded");
        for bar in &loaded.bars {
            print_line("history", bar);
        }

        let marks = feed.fetch_marks(from, to).await;
        for mark in &marks {
            print_line("mark", mark);
        }

        let symbol = feed.symbol_info(&feed.context().symbol)?;
        info!(name = %symbol.name, pricescale = symbol.pricescale, "Symbol resolved");

        feed.subscribe_live(
            options.resolution,
            "watch",
            Arc::new(|bar: Bar| print_line("live", &bar)),
            Some(Arc::new(|| warn!("Feed reset requested"))),
        );

        shutdown_signal().await;
        feed.teardown();
        if let Some(upstream) = upstream {
            upstream.stop().await;
        }
        Ok(())
    }
}

fn print_line<T: serde::Serialize>(kind: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(value) => println!("{}", serde_json::json!({ "kind": kind, "value": value })),
        Err(e) => warn!(error = %e, "Failed to serialize output"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sse_transport_by_default() {
        let app = Application::new(AppConfig::default());
        let (transport, client) = app.build_transport().unwrap();
        assert_eq!(transport.name(), "sse");
        assert!(client.is_none());
    }

    #[tokio::test]
    async fn test_socket_transport_requires_key() {
        let mut config = AppConfig::default();
        config.feed.transport = TransportMode::Socket;
        let app = Application::new(config.clone());
        assert!(matches!(app.build_transport(), Err(AppError::Config(_))));

        config.apply_api_key(Some("secret".to_string()));
        let (transport, client) = Application::new(config).build_transport().unwrap();
        assert_eq!(transport.name(), "socket");
        assert!(client.is_some());
    }

    #[test]
    fn test_watch_settings() {
        let options = WatchOptions {
            asset: "0xabc".to_string(),
            chain: "base".to_string(),
            symbol: None,
            resolution: Resolution::Minute5,
            metric: Metric::MarketCap,
            quote: true,
            supply: Some(1e9),
            marks_filter: None,
        };
        let settings = options.settings();
        assert!(!settings.is_usd);
        assert!(settings.has_supply());
        assert_eq!(settings.scale_divisor, 1.0);
    }
}
