//! Core domain types for the chartfeed real-time chart data feed.
//!
//! This crate provides the types and pure functions shared by every layer:
//! - `Bar`, `RawBar`: OHLCV candles in canonical and wire form
//! - `SettingsSnapshot`, `CacheKey`: the identity under which bars are cached
//! - `transform`, `select_scale`: price / market-cap conversion and display scale
//! - `Mark`, `Trade`: chart annotations built from trade history

pub mod bar;
pub mod error;
pub mod mark;
pub mod resolution;
pub mod settings;
pub mod transform;

pub use bar::{bridge_bar, normalize_time_ms, Bar, RawBar};
pub use error::{CoreError, Result};
pub use mark::{Mark, MarkColor, MarksScope, Trade, TradeSide};
pub use resolution::Resolution;
pub use settings::{CacheKey, CurrencyMode, Metric, RequestKey, SettingsSnapshot};
pub use transform::{
    select_scale, transform, transform_series, MAX_PRICE_DECIMALS, MIN_PRICE_DECIMALS,
};
