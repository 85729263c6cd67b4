//! Last-bar memory and in-flight request deduplication.
//!
//! Price-mode loads are shared: concurrent requests for the same
//! [`RequestKey`] await one load, and a completed load keeps absorbing
//! duplicates for a short grace window. Market-cap loads are never shared
//! because their values depend on a supply figure that may have just changed.

use crate::error::{FeedError, FeedResult};
use chartfeed_core::{transform_series, Bar, CacheKey, Metric, RawBar, RequestKey, SettingsSnapshot};
use chartfeed_telemetry::Metrics;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type SharedLoad = Shared<BoxFuture<'static, FeedResult<Arc<Vec<Bar>>>>>;

struct PendingFetch {
    id: u64,
    load: SharedLoad,
}

#[derive(Default)]
struct CacheState {
    last_bars: HashMap<CacheKey, Bar>,
    pending: HashMap<RequestKey, PendingFetch>,
    /// Generation each key's loads were started under. Invalidation removes
    /// the entry; loads whose generation is gone do not write their last bar.
    generations: HashMap<CacheKey, u64>,
    /// Bumped by every purge so a re-created entry never reuses a stale value.
    epoch: u64,
    next_id: u64,
}

impl CacheState {
    fn generation(&mut self, key: &CacheKey) -> u64 {
        let epoch = self.epoch;
        *self.generations.entry(key.clone()).or_insert(epoch)
    }

    fn is_current(&self, key: &CacheKey, generation: u64) -> bool {
        self.generations.get(key) == Some(&generation)
    }

    fn set_last_bar(&mut self, key: &CacheKey, bar: Bar) -> bool {
        match self.last_bars.get(key) {
            Some(cached) if bar.time_ms() < cached.time_ms() => false,
            _ => {
                self.last_bars.insert(key.clone(), bar);
                true
            }
        }
    }

    fn remove_pending(&mut self, key: &RequestKey, id: u64) {
        if self.pending.get(key).is_some_and(|p| p.id == id) {
            self.pending.remove(key);
        }
    }

    /// Drop pending loads and the last bar of every key matching `predicate`.
    fn purge<P: Fn(&CacheKey) -> bool>(&mut self, predicate: P) -> usize {
        let before = self.last_bars.len() + self.pending.len();
        self.last_bars.retain(|k, _| !predicate(k));
        self.pending.retain(|k, _| !predicate(&k.cache_key));
        self.epoch += 1;
        self.generations.retain(|k, _| !predicate(k));
        before - (self.last_bars.len() + self.pending.len())
    }
}

/// Bar cache owned by one datafeed instance.
pub struct BarCache {
    state: Arc<Mutex<CacheState>>,
    grace: Duration,
    timeout: Duration,
}

impl BarCache {
    pub fn new(grace: Duration, timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            grace,
            timeout,
        }
    }

    /// Load the bars for `request`, transformed under `settings`.
    ///
    /// `loader` is only invoked when no shareable load is in flight. On
    /// success the newest bar becomes the key's last bar. A failed or timed
    /// out load is removed immediately so the next call retries.
    pub async fn fetch<F, Fut>(
        &self,
        request: RequestKey,
        settings: SettingsSnapshot,
        loader: F,
    ) -> FeedResult<Arc<Vec<Bar>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeedResult<Vec<RawBar>>> + Send + 'static,
    {
        if settings.metric == Metric::MarketCap {
            return self.fetch_uncached(request, settings, loader).await;
        }

        let load = {
            let mut state = self.state.lock();
            if let Some(pending) = state.pending.get(&request) {
                debug!(request = %request, "Joining in-flight bar request");
                Metrics::bar_request("dedup");
                pending.load.clone()
            } else {
                state.next_id += 1;
                let id = state.next_id;
                let generation = state.generation(&request.cache_key);
                let load = self.shared_load(request.clone(), id, generation, settings, loader());
                state.pending.insert(
                    request.clone(),
                    PendingFetch {
                        id,
                        load: load.clone(),
                    },
                );
                Metrics::bar_request("issued");
                load
            }
        };

        load.await
    }

    fn shared_load<Fut>(
        &self,
        request: RequestKey,
        id: u64,
        generation: u64,
        settings: SettingsSnapshot,
        loading: Fut,
    ) -> SharedLoad
    where
        Fut: Future<Output = FeedResult<Vec<RawBar>>> + Send + 'static,
    {
        let state = self.state.clone();
        let grace = self.grace;
        let timeout = self.timeout;

        async move {
            let result = load_series(loading, settings, timeout).await;
            match &result {
                Ok(bars) => {
                    record_last_bar(&state, &request.cache_key, generation, bars);
                    let state = state.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        state.lock().remove_pending(&request, id);
                    });
                }
                Err(e) => {
                    warn!(request = %request, error = %e, "Bar request failed");
                    Metrics::bar_request("failed");
                    state.lock().remove_pending(&request, id);
                }
            }
            result.map(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Market-cap path: purge the key, then load without sharing.
    async fn fetch_uncached<F, Fut>(
        &self,
        request: RequestKey,
        settings: SettingsSnapshot,
        loader: F,
    ) -> FeedResult<Arc<Vec<Bar>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeedResult<Vec<RawBar>>> + Send + 'static,
    {
        let generation = {
            let mut state = self.state.lock();
            let key = &request.cache_key;
            state.purge(|k| k == key);
            state.generation(key)
        };
        Metrics::bar_request("bypass");

        match load_series(loader(), settings, self.timeout).await {
            Ok(bars) => {
                record_last_bar(&self.state, &request.cache_key, generation, &bars);
                Ok(Arc::new(bars))
            }
            Err(e) => {
                warn!(request = %request, error = %e, "Market-cap bar request failed");
                Metrics::bar_request("failed");
                Err(e)
            }
        }
    }

    /// Record `bar` unless it is older than the cached last bar.
    pub fn set_last_bar(&self, key: &CacheKey, bar: Bar) -> bool {
        self.state.lock().set_last_bar(key, bar)
    }

    pub fn last_bar(&self, key: &CacheKey) -> Option<Bar> {
        self.state.lock().last_bars.get(key).copied()
    }

    /// Newest last bar among keys matching `predicate`.
    pub fn latest_bar<P: Fn(&CacheKey) -> bool>(&self, predicate: P) -> Option<Bar> {
        self.state
            .lock()
            .last_bars
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(_, bar)| *bar)
            .max_by_key(|bar| bar.time_ms())
    }

    /// Drop every entry whose key matches `predicate`. Returns the number of
    /// entries removed.
    pub fn invalidate<P: Fn(&CacheKey) -> bool>(&self, predicate: P) -> usize {
        let removed = self.state.lock().purge(predicate);
        debug!(removed, "Bar cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.invalidate(|_| true);
    }

    /// Number of requests currently shareable.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

async fn load_series<Fut>(
    loading: Fut,
    settings: SettingsSnapshot,
    timeout: Duration,
) -> FeedResult<Vec<Bar>>
where
    Fut: Future<Output = FeedResult<Vec<RawBar>>>,
{
    let raw = tokio::time::timeout(timeout, loading)
        .await
        .map_err(|_| FeedError::Timeout(timeout.as_millis() as u64))??;
    Ok(transform_series(raw, &settings))
}

fn record_last_bar(state: &Mutex<CacheState>, key: &CacheKey, generation: u64, bars: &[Bar]) {
    let Some(last) = bars.last() else {
        return;
    };
    let mut state = state.lock();
    if state.is_current(key, generation) {
        state.set_last_bar(key, *last);
    } else {
        debug!(key = %key, "Discarding last bar of invalidated load");
    }
}
