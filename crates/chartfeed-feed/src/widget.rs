//! Types exchanged with the charting widget.

use chartfeed_core::{Bar, Resolution};
use serde::{Deserialize, Serialize};

/// Capabilities reported by `on_ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
    pub supports_marks: bool,
    pub supports_timescale_marks: bool,
    pub supports_time: bool,
}

/// Symbol metadata returned by `resolve_symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Asset identifier the widget passes back on every call.
    pub ticker: String,
    pub description: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub listed_exchange: String,
    pub format: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub has_intraday: bool,
    pub has_seconds: bool,
    pub has_daily: bool,
    pub has_weekly_and_monthly: bool,
    pub supported_resolutions: Vec<String>,
    pub volume_precision: u32,
    pub data_status: String,
}

/// Range of one history request. Times are epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodParams {
    pub from: i64,
    pub to: i64,
    pub count_back: u32,
    #[serde(default)]
    pub first_data_request: bool,
}

/// History response: bars ascending by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResult {
    pub bars: Vec<Bar>,
    pub no_data: bool,
}

impl HistoryResult {
    pub fn new(bars: Vec<Bar>) -> Self {
        let no_data = bars.is_empty();
        Self { bars, no_data }
    }
}

pub(crate) fn widget_resolutions(resolutions: &[Resolution]) -> Vec<String> {
    resolutions
        .iter()
        .map(|r| r.as_widget_str().to_string())
        .collect()
}
