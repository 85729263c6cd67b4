//! Chart-facing data feed.
//!
//! Reconciles REST history with live ticks for one chart context:
//! - [`BarCache`]: last-bar memory and in-flight request deduplication
//! - [`SubscriptionManager`]: one live stream per listener, gap bridging
//! - [`MarksCache`]: trade marks per (asset, chain)
//! - [`Datafeed`]: the operations a charting widget calls

pub mod bar_cache;
pub mod config;
pub mod datafeed;
pub mod error;
pub mod marks_cache;
pub mod provider;
pub mod rest;
pub mod subscription;
pub mod widget;

#[cfg(test)]
pub(crate) mod testing;

pub use bar_cache::BarCache;
pub use config::{FeedConfig, TransportMode};
pub use datafeed::{Datafeed, DatafeedContext};
pub use error::{FeedError, FeedResult};
pub use marks_cache::MarksCache;
pub use provider::{BarProvider, HistoryRequest, TradeProvider, TradeRequest};
pub use rest::HistoryClient;
pub use subscription::{LiveRequest, ResetCallback, SubscriptionManager, TickCallback};
pub use widget::{DatafeedConfiguration, HistoryResult, PeriodParams, SymbolInfo};
