//! External data providers.

use crate::error::FeedResult;
use async_trait::async_trait;
use chartfeed_core::{RawBar, Resolution, Trade};

/// One history load, in provider terms.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub asset: String,
    pub chain: String,
    pub resolution: Resolution,
    /// Range start, epoch seconds.
    pub from: i64,
    /// Range end, epoch seconds.
    pub to: i64,
    /// Minimum number of bars the widget wants before `to`.
    pub count_back: u32,
    pub is_usd: bool,
}

/// Trade history for one maker address.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub asset: String,
    pub chain: String,
    pub from: i64,
    pub to: i64,
    pub maker: String,
}

/// Source of historical bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BarProvider: Send + Sync {
    async fn fetch_bars(&self, request: HistoryRequest) -> FeedResult<Vec<RawBar>>;
}

/// Source of historical trades used for chart marks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeProvider: Send + Sync {
    async fn fetch_trades(&self, request: TradeRequest) -> FeedResult<Vec<Trade>>;
}
