//! Trade history and chart marks.
//!
//! Each historical trade of the filtered address becomes one [`Mark`] on the
//! chart. Marks are identified by the trade hash within a [`MarksScope`].

use crate::bar::normalize_time_ms;
use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    #[serde(alias = "b", alias = "BUY", alias = "Buy")]
    Buy,
    #[serde(alias = "s", alias = "SELL", alias = "Sell")]
    Sell,
}

/// Historical trade as returned by the trade-history provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub hash: String,
    /// Execution time in epoch milliseconds.
    #[serde(alias = "date", deserialize_with = "de_trade_time")]
    pub time: i64,
    #[serde(alias = "type")]
    pub side: TradeSide,
    #[serde(alias = "token_price", default)]
    pub price_usd: f64,
    #[serde(alias = "token_amount", default)]
    pub amount: f64,
    #[serde(alias = "token_amount_usd", default)]
    pub value_usd: f64,
}

/// Mark color understood by the chart widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkColor {
    Green,
    Red,
}

/// Chart annotation for one trade. Immutable once cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    /// Trade hash.
    pub id: String,
    /// Epoch seconds.
    pub time: i64,
    pub color: MarkColor,
    pub label: String,
    pub text: String,
}

impl Mark {
    /// Build the mark shown for `trade`.
    pub fn from_trade(trade: &Trade, symbol: &str) -> Self {
        let (color, label, verb) = match trade.side {
            TradeSide::Buy => (MarkColor::Green, "B", "Bought"),
            TradeSide::Sell => (MarkColor::Red, "S", "Sold"),
        };
        let mut text = format!(
            "{verb} {} {symbol} at ${}",
            format_compact(trade.amount),
            format_price(trade.price_usd)
        );
        if trade.value_usd > 0.0 {
            text.push_str(&format!(" (${})", format_compact(trade.value_usd)));
        }

        Self {
            id: trade.hash.clone(),
            time: normalize_time_ms(trade.time) / 1000,
            color,
            label: label.to_string(),
            text,
        }
    }
}

/// Identity of a marks collection: one asset on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarksScope {
    pub asset: String,
    pub chain: String,
}

impl MarksScope {
    pub fn new(asset: &str, chain: &str) -> Self {
        Self {
            asset: asset.to_ascii_lowercase(),
            chain: chain.to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for MarksScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset, self.chain)
    }
}

/// Format with K/M/B suffixes and two decimals.
fn format_compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2}K", value / 1e3)
    } else {
        format!("{value:.2}")
    }
}

/// Format a price keeping four significant digits for sub-unit values.
fn format_price(price: f64) -> String {
    if !price.is_finite() || price <= 0.0 {
        return "0".to_string();
    }
    if price >= 1.0 {
        return format!("{price:.2}");
    }
    let magnitude = price.log10().floor() as i32;
    let decimals = (3 - magnitude).clamp(2, 16) as usize;
    format!("{price:.decimals$}")
}

fn de_trade_time<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireTime {
        Number(f64),
        Text(String),
    }

    match WireTime::deserialize(d)? {
        WireTime::Number(n) if n.is_finite() => Ok(normalize_time_ms(n.round() as i64)),
        WireTime::Number(_) => Err(serde::de::Error::custom("trade time is not finite")),
        WireTime::Text(s) => {
            if let Ok(n) = s.trim().parse::<i64>() {
                return Ok(normalize_time_ms(n));
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| serde::de::Error::custom(format!("invalid trade time {s:?}: {e}")))
        }
    }
}
