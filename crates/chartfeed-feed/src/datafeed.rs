//! Datafeed façade consumed by the charting widget.
//!
//! One instance per chart context. It owns its bar cache, marks cache and
//! subscription table; nothing is shared with other instances. Callback
//! operations are scheduled on the tokio runtime and never run inline; called
//! outside a runtime they report through their error callback instead.
//! Each request captures the context when it is issued.

use crate::bar_cache::BarCache;
use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::marks_cache::MarksCache;
use crate::provider::{BarProvider, HistoryRequest, TradeProvider, TradeRequest};
use crate::subscription::{LiveRequest, ResetCallback, SubscriptionManager, TickCallback};
use crate::widget::{
    widget_resolutions, DatafeedConfiguration, HistoryResult, PeriodParams, SymbolInfo,
};
use chartfeed_core::{
    select_scale, Bar, CacheKey, Mark, MarksScope, Metric, RequestKey, Resolution,
    SettingsSnapshot,
};
use chartfeed_stream::{StreamTransport, StreamType};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Chart context a datafeed serves.
#[derive(Debug, Clone, PartialEq)]
pub struct DatafeedContext {
    /// Token address.
    pub asset: String,
    pub chain: String,
    /// Display symbol, e.g. `PEPE`.
    pub symbol: String,
    pub settings: SettingsSnapshot,
    /// Maker address whose trades are shown as marks.
    pub marks_filter: Option<String>,
    /// Price known before any bar is loaded, used for the initial scale.
    pub reference_price: Option<f64>,
}

impl DatafeedContext {
    pub fn new(asset: impl Into<String>, chain: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            chain: chain.into(),
            symbol: symbol.into(),
            settings: SettingsSnapshot::default(),
            marks_filter: None,
            reference_price: None,
        }
    }

    fn marks_scope(&self) -> MarksScope {
        MarksScope::new(&self.asset, &self.chain)
    }

    fn cache_key(&self, resolution: Resolution) -> CacheKey {
        CacheKey::new(&self.asset, resolution, &self.settings)
    }
}

struct DatafeedInner {
    config: FeedConfig,
    bars: Arc<BarCache>,
    marks: MarksCache,
    subscriptions: SubscriptionManager,
    bar_provider: Arc<dyn BarProvider>,
    trade_provider: Arc<dyn TradeProvider>,
    context: RwLock<DatafeedContext>,
}

/// Widget-facing feed. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Datafeed {
    inner: Arc<DatafeedInner>,
}

impl Datafeed {
    pub fn new(
        config: FeedConfig,
        context: DatafeedContext,
        bar_provider: Arc<dyn BarProvider>,
        trade_provider: Arc<dyn TradeProvider>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let bars = Arc::new(BarCache::new(
            Duration::from_millis(config.dedup_grace_ms),
            Duration::from_millis(config.request_timeout_ms),
        ));
        info!(
            asset = %context.asset,
            chain = %context.chain,
            transport = transport.name(),
            "Datafeed created"
        );
        Self {
            inner: Arc::new(DatafeedInner {
                marks: MarksCache::new(config.max_marks_per_scope),
                subscriptions: SubscriptionManager::new(transport, bars.clone()),
                bars,
                bar_provider,
                trade_provider,
                context: RwLock::new(context),
                config,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Widget contract
    // ------------------------------------------------------------------

    /// Report capabilities on a later scheduler turn.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(DatafeedConfiguration) + Send + 'static,
    {
        let configuration = self.configuration();
        let runtime = match runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "onReady dropped");
                return;
            }
        };
        runtime.spawn(async move {
            tokio::task::yield_now().await;
            callback(configuration);
        });
    }

    pub fn configuration(&self) -> DatafeedConfiguration {
        DatafeedConfiguration {
            supported_resolutions: widget_resolutions(&self.inner.config.supported_resolutions),
            supports_marks: true,
            supports_timescale_marks: false,
            supports_time: true,
        }
    }

    pub fn resolve_symbol<F, E>(&self, symbol_name: &str, on_resolve: F, on_error: E)
    where
        F: FnOnce(SymbolInfo) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let runtime = match runtime() {
            Ok(runtime) => runtime,
            Err(e) => return on_error(e.to_string()),
        };
        let resolved = self.symbol_info(symbol_name);
        runtime.spawn(async move {
            tokio::task::yield_now().await;
            match resolved {
                Ok(info) => on_resolve(info),
                Err(e) => on_error(e.to_string()),
            }
        });
    }

    /// Symbol metadata for the current context and settings.
    pub fn symbol_info(&self, symbol_name: &str) -> FeedResult<SymbolInfo> {
        if symbol_name.trim().is_empty() {
            return Err(FeedError::InvalidSymbol("empty symbol name".to_string()));
        }
        let ctx = self.inner.context.read().clone();
        let settings = ctx.settings;
        let metric_label = match settings.metric {
            Metric::Price => "Price",
            Metric::MarketCap => "Market Cap",
        };
        let currency_label = if settings.is_usd { "USD" } else { "Quote" };
        let resolutions = widget_resolutions(&self.inner.config.supported_resolutions);
        let supported = &self.inner.config.supported_resolutions;

        Ok(SymbolInfo {
            name: format!("{} {}", ctx.symbol, metric_label),
            ticker: ctx.asset.clone(),
            description: format!("{} {} ({})", ctx.symbol, metric_label, currency_label),
            symbol_type: "crypto".to_string(),
            session: "24x7".to_string(),
            timezone: "Etc/UTC".to_string(),
            exchange: ctx.chain.clone(),
            listed_exchange: ctx.chain.clone(),
            format: "price".to_string(),
            minmov: 1,
            pricescale: self.price_scale(&ctx),
            has_intraday: supported.iter().any(Resolution::is_intraday),
            has_seconds: supported.contains(&Resolution::Second1),
            has_daily: supported.contains(&Resolution::Day1),
            has_weekly_and_monthly: supported.contains(&Resolution::Week1),
            supported_resolutions: resolutions,
            volume_precision: 2,
            data_status: "streaming".to_string(),
        })
    }

    /// Display scale from the newest known value of the current asset.
    fn price_scale(&self, ctx: &DatafeedContext) -> u64 {
        let settings = ctx.settings;
        let cached = self.inner.bars.latest_bar(|k| {
            k.is_asset(&ctx.asset) && k.metric == settings.metric && k.currency == settings.currency()
        });
        let reference = match (cached, ctx.reference_price) {
            (Some(bar), _) => bar.close,
            (None, Some(price)) if settings.metric == Metric::MarketCap && settings.has_supply() => {
                price * settings.circulating_supply
            }
            (None, Some(price)) => price,
            (None, None) => 0.0,
        };
        let divisor = if settings.scale_divisor.is_finite() && settings.scale_divisor > 0.0 {
            settings.scale_divisor
        } else {
            1.0
        };
        select_scale(reference / divisor, settings.metric, settings.has_supply())
    }

    pub fn get_bars<F, E>(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        params: PeriodParams,
        on_result: F,
        on_error: E,
    ) where
        F: FnOnce(HistoryResult) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        debug!(symbol = %symbol_info.name, resolution, from = params.from, to = params.to, "getBars");
        let runtime = match runtime() {
            Ok(runtime) => runtime,
            Err(e) => return on_error(e.to_string()),
        };
        let feed = self.clone();
        let ctx = self.context();
        let resolution = resolution.to_string();
        runtime.spawn(async move {
            let result = match resolution.parse::<Resolution>() {
                Ok(resolution) => feed.fetch_history_for(ctx, resolution, params).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(history) => on_result(history),
                Err(e) => on_error(e.to_string()),
            }
        });
    }

    /// Load history for the current context.
    ///
    /// Settings are captured once, so a settings change while the request is
    /// in flight does not alter how its bars are transformed.
    pub async fn fetch_history(
        &self,
        resolution: Resolution,
        params: PeriodParams,
    ) -> FeedResult<HistoryResult> {
        self.fetch_history_for(self.context(), resolution, params).await
    }

    async fn fetch_history_for(
        &self,
        ctx: DatafeedContext,
        resolution: Resolution,
        params: PeriodParams,
    ) -> FeedResult<HistoryResult> {
        let settings = ctx.settings;
        let key = RequestKey::new(ctx.cache_key(resolution), params.from, params.to, params.count_back);

        let provider = self.inner.bar_provider.clone();
        let request = HistoryRequest {
            asset: ctx.asset.clone(),
            chain: ctx.chain.clone(),
            resolution,
            from: params.from,
            to: params.to,
            count_back: params.count_back,
            is_usd: settings.is_usd,
        };

        let bars = self
            .inner
            .bars
            .fetch(key, settings, move || async move {
                provider.fetch_bars(request).await
            })
            .await?;

        debug!(asset = %ctx.asset, %resolution, count = bars.len(), "History loaded");
        Ok(HistoryResult::new(bars.as_ref().clone()))
    }

    pub fn subscribe_bars<T, R>(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        on_tick: T,
        listener_guid: &str,
        on_reset_cache_needed: R,
    ) where
        T: Fn(Bar) + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        let resolution = match resolution.parse::<Resolution>() {
            Ok(r) => r,
            Err(e) => {
                warn!(listener = %listener_guid, error = %e, "subscribeBars with bad resolution");
                return;
            }
        };
        debug!(symbol = %symbol_info.name, listener = %listener_guid, "subscribeBars");
        self.subscribe_live(
            resolution,
            listener_guid,
            Arc::new(on_tick),
            Some(Arc::new(on_reset_cache_needed)),
        );
    }

    /// Start live bars for `listener_guid` at `resolution`.
    pub fn subscribe_live(
        &self,
        resolution: Resolution,
        listener_guid: &str,
        on_tick: TickCallback,
        on_reset: Option<ResetCallback>,
    ) -> bool {
        let ctx = self.inner.context.read().clone();
        let request = LiveRequest {
            cache_key: ctx.cache_key(resolution),
            stream_type: StreamType::Ohlcv,
            payload: json!({
                "asset": ctx.asset,
                "chain": ctx.chain,
                "period": resolution.period(),
                "usd": ctx.settings.is_usd,
            }),
            settings: ctx.settings,
        };
        self.inner
            .subscriptions
            .subscribe(listener_guid, request, on_tick, on_reset)
    }

    pub fn unsubscribe_bars(&self, listener_guid: &str) {
        self.inner.subscriptions.unsubscribe(listener_guid);
    }

    pub fn get_marks<F>(
        &self,
        symbol_info: &SymbolInfo,
        from: i64,
        to: i64,
        on_data: F,
        resolution: &str,
    ) where
        F: FnOnce(Vec<Mark>) + Send + 'static,
    {
        debug!(symbol = %symbol_info.name, from, to, resolution, "getMarks");
        let runtime = match runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "getMarks answered without trades");
                return on_data(Vec::new());
            }
        };
        let feed = self.clone();
        let ctx = self.context();
        runtime.spawn(async move {
            let marks = feed.fetch_marks_for(ctx, from, to).await;
            on_data(marks);
        });
    }

    /// Marks for the current scope and filter; empty when no filter is set.
    ///
    /// Provider failures are logged and answered with the cached set.
    pub async fn fetch_marks(&self, from: i64, to: i64) -> Vec<Mark> {
        self.fetch_marks_for(self.context(), from, to).await
    }

    async fn fetch_marks_for(&self, ctx: DatafeedContext, from: i64, to: i64) -> Vec<Mark> {
        let Some(maker) = ctx.marks_filter.clone() else {
            return Vec::new();
        };
        let scope = ctx.marks_scope();

        let request = TradeRequest {
            asset: ctx.asset.clone(),
            chain: ctx.chain.clone(),
            from,
            to,
            maker: maker.clone(),
        };
        let trades = match self.inner.trade_provider.fetch_trades(request).await {
            Ok(trades) => trades,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Trade history request failed");
                return self.inner.marks.current(&scope);
            }
        };

        // The filter or asset changed while loading; these trades belong to
        // a scope that has since been invalidated. The guard is held through
        // the merge so a filter change cannot slip in between.
        let now = self.inner.context.read();
        if now.marks_filter.as_deref() != Some(maker.as_str()) || now.marks_scope() != scope {
            debug!(scope = %scope, "Discarding marks for a stale filter");
            return Vec::new();
        }
        let marks = trades.iter().map(|t| Mark::from_trade(t, &ctx.symbol));
        let merged = self.inner.marks.merge(&scope, marks);
        drop(now);
        merged
    }

    // ------------------------------------------------------------------
    // Context changes
    // ------------------------------------------------------------------

    /// Switch the chart to another asset.
    ///
    /// Drops every cached bar and mark of the previous asset and closes all
    /// live subscriptions, then asks each listener to reload.
    pub fn set_asset(&self, asset: &str, chain: &str, symbol: &str) {
        let previous = {
            let mut ctx = self.inner.context.write();
            if ctx.asset.eq_ignore_ascii_case(asset) && ctx.chain.eq_ignore_ascii_case(chain) {
                ctx.symbol = symbol.to_string();
                return;
            }
            let previous = ctx.clone();
            ctx.asset = asset.to_string();
            ctx.chain = chain.to_string();
            ctx.symbol = symbol.to_string();
            ctx.reference_price = None;
            previous
        };

        info!(from = %previous.asset, to = %asset, "Asset switched");
        self.inner.bars.invalidate(|k| k.is_asset(&previous.asset));
        self.inner.marks.invalidate_scope(&previous.marks_scope());
        let resets = self.inner.subscriptions.unsubscribe_all();
        notify(resets);
    }

    /// Apply new display settings.
    ///
    /// - metric or currency change: entries of the previous combination are
    ///   dropped and every listener is reset
    /// - supply change in market-cap mode: market-cap entries are dropped and
    ///   every listener is reset
    /// - scale divisor change: listeners are reset
    pub fn update_settings(&self, settings: SettingsSnapshot) {
        let (old, asset) = {
            let mut ctx = self.inner.context.write();
            let old = ctx.settings;
            ctx.settings = settings;
            (old, ctx.asset.clone())
        };
        if old == settings {
            return;
        }

        let mode_changed = old.metric != settings.metric || old.is_usd != settings.is_usd;
        let supply_changed = settings.metric == Metric::MarketCap
            && old.circulating_supply.to_bits() != settings.circulating_supply.to_bits();
        let divisor_changed = old.scale_divisor.to_bits() != settings.scale_divisor.to_bits();

        if mode_changed {
            let removed = self.inner.bars.invalidate(|k| {
                k.is_asset(&asset) && k.metric == old.metric && k.currency == old.currency()
            });
            info!(
                %asset,
                from = %old.metric,
                to = %settings.metric,
                removed,
                "Display mode changed"
            );
        } else if supply_changed {
            let removed = self
                .inner
                .bars
                .invalidate(|k| k.is_asset(&asset) && k.metric == Metric::MarketCap);
            info!(%asset, supply = settings.circulating_supply, removed, "Supply changed");
        } else if !divisor_changed {
            return;
        }

        let resets = self
            .inner
            .subscriptions
            .remove_where(|k| k.is_asset(&asset));
        notify(resets);
    }

    /// Set the maker address whose trades become marks.
    pub fn set_marks_filter(&self, filter: Option<String>) {
        let mut ctx = self.inner.context.write();
        let unchanged = match (&ctx.marks_filter, &filter) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        ctx.marks_filter = filter;
        let scope = ctx.marks_scope();
        self.inner.marks.invalidate_scope(&scope);
        debug!(scope = %scope, "Marks filter changed");
    }

    pub fn set_reference_price(&self, price: Option<f64>) {
        self.inner.context.write().reference_price = price;
    }

    pub fn settings_snapshot(&self) -> SettingsSnapshot {
        self.inner.context.read().settings
    }

    pub fn context(&self) -> DatafeedContext {
        self.inner.context.read().clone()
    }

    /// Last bar cached for `resolution` under the current settings.
    pub fn last_bar(&self, resolution: Resolution) -> Option<Bar> {
        let key = self.inner.context.read().cache_key(resolution);
        self.inner.bars.last_bar(&key)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Close every subscription and clear every cache.
    pub fn teardown(&self) {
        let closed = self.inner.subscriptions.unsubscribe_all().len();
        self.inner.bars.clear();
        self.inner.marks.clear();
        info!(closed, "Datafeed torn down");
    }
}

fn runtime() -> FeedResult<Handle> {
    Handle::try_current().map_err(|e| FeedError::Runtime(e.to_string()))
}

fn notify(resets: Vec<ResetCallback>) {
    for reset in resets {
        reset();
    }
}
