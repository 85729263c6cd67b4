//! Prometheus metrics for chartfeed.
//!
//! Covers:
//! - History requests (issued, deduplicated, market-cap bypass, failed)
//! - Stream frames (forwarded, handshake, malformed, dropped)
//! - Live bars delivered to the chart (tick, bridge, stale)
//! - Active live subscriptions, gateway connections and cached marks
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup bug that should crash immediately.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_gauge, CounterVec, Encoder, IntGauge, TextEncoder,
};

/// History bar requests by outcome.
/// Labels: outcome (issued/dedup/bypass/failed)
pub static BAR_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chartfeed_bar_requests_total",
        "History bar requests by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Stream frames by handling result.
/// Labels: result (forwarded/handshake/malformed)
pub static STREAM_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chartfeed_stream_frames_total",
        "Stream frames by handling result",
        &["result"]
    )
    .unwrap()
});

/// Live bars by kind.
/// Labels: kind (tick/bridge/stale)
pub static LIVE_BARS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chartfeed_live_bars_total",
        "Live bars handled by the subscription manager",
        &["kind"]
    )
    .unwrap()
});

/// Currently active live subscriptions.
pub static ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "chartfeed_active_subscriptions",
        "Currently active live bar subscriptions"
    )
    .unwrap()
});

/// Currently open gateway SSE connections.
pub static GATEWAY_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "chartfeed_gateway_connections",
        "Currently open server-sent-event connections"
    )
    .unwrap()
});

/// Cached marks across every scope.
pub static MARKS_CACHED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("chartfeed_marks_cached", "Cached trade marks").unwrap()
});

/// Metrics helper for recording values.
pub struct Metrics;

impl Metrics {
    /// Record a history request outcome.
    pub fn bar_request(outcome: &str) {
        BAR_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a stream frame result.
    pub fn stream_frame(result: &str) {
        STREAM_FRAMES_TOTAL.with_label_values(&[result]).inc();
    }

    /// Record a live bar.
    pub fn live_bar(kind: &str) {
        LIVE_BARS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn subscription_opened() {
        ACTIVE_SUBSCRIPTIONS.inc();
    }

    pub fn subscription_closed() {
        ACTIVE_SUBSCRIPTIONS.dec();
    }

    pub fn gateway_connection_opened() {
        GATEWAY_CONNECTIONS.inc();
    }

    pub fn gateway_connection_closed() {
        GATEWAY_CONNECTIONS.dec();
    }

    /// Adjust the cached marks total by `delta`.
    pub fn marks_cached(delta: i64) {
        MARKS_CACHED.add(delta);
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn encode_metrics() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_appear_in_encoded_output() {
        Metrics::bar_request("issued");
        Metrics::stream_frame("malformed");
        Metrics::live_bar("bridge");

        let text = encode_metrics().unwrap();
        assert!(text.contains("chartfeed_bar_requests_total"));
        assert!(text.contains("chartfeed_stream_frames_total"));
        assert!(text.contains("chartfeed_live_bars_total"));
    }

    #[test]
    fn test_subscription_gauge_moves() {
        let before = ACTIVE_SUBSCRIPTIONS.get();
        Metrics::subscription_opened();
        assert_eq!(ACTIVE_SUBSCRIPTIONS.get(), before + 1);
        Metrics::subscription_closed();
        assert_eq!(ACTIVE_SUBSCRIPTIONS.get(), before);
    }
}
