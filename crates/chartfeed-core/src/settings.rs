//! Display settings and cache identity.
//!
//! A [`SettingsSnapshot`] is captured when a request is issued so that a later
//! settings change never alters an in-flight request. [`CacheKey`] scopes
//! cached bars to one (asset, resolution, currency, metric) combination.

use crate::error::CoreError;
use crate::resolution::Resolution;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Displayed value: raw price or price multiplied by circulating supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Price,
    #[serde(alias = "mcap")]
    MarketCap,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::MarketCap => "marketcap",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "price" => Ok(Self::Price),
            "marketcap" | "mcap" => Ok(Self::MarketCap),
            other => Err(CoreError::InvalidMetric(other.to_string())),
        }
    }
}

/// Quote currency of displayed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyMode {
    #[default]
    Usd,
    /// The pair's native quote token.
    Quote,
}

impl CurrencyMode {
    pub fn from_is_usd(is_usd: bool) -> Self {
        if is_usd {
            Self::Usd
        } else {
            Self::Quote
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Quote => "quote",
        }
    }
}

impl fmt::Display for CurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(Self::Usd),
            "quote" | "native" => Ok(Self::Quote),
            other => Err(CoreError::InvalidCurrency(other.to_string())),
        }
    }
}

/// Immutable settings captured at request time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub is_usd: bool,
    pub metric: Metric,
    /// Circulating supply used for the market-cap transform. Zero or negative
    /// means unknown.
    pub circulating_supply: f64,
    /// Divisor applied to the reference value before choosing a display scale.
    pub scale_divisor: f64,
}

impl SettingsSnapshot {
    pub fn currency(&self) -> CurrencyMode {
        CurrencyMode::from_is_usd(self.is_usd)
    }

    /// Whether a usable supply figure is present.
    pub fn has_supply(&self) -> bool {
        self.circulating_supply.is_finite() && self.circulating_supply > 0.0
    }
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            is_usd: true,
            metric: Metric::Price,
            circulating_supply: 0.0,
            scale_divisor: 1.0,
        }
    }
}

/// Composite identity of cached bars.
///
/// Format: `{asset}:{resolution}:{currency}:{metric}` with the asset lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset: String,
    pub resolution: Resolution,
    pub currency: CurrencyMode,
    pub metric: Metric,
}

impl CacheKey {
    pub fn new(asset: &str, resolution: Resolution, settings: &SettingsSnapshot) -> Self {
        Self {
            asset: asset.to_ascii_lowercase(),
            resolution,
            currency: settings.currency(),
            metric: settings.metric,
        }
    }

    /// Whether this key belongs to `asset` (case-insensitive).
    pub fn is_asset(&self, asset: &str) -> bool {
        self.asset.eq_ignore_ascii_case(asset)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.asset, self.resolution, self.currency, self.metric
        )
    }
}

/// Cache key plus the requested time range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub cache_key: CacheKey,
    pub from: i64,
    pub to: i64,
    pub count_back: u32,
}

impl RequestKey {
    pub fn new(cache_key: CacheKey, from: i64, to: i64, count_back: u32) -> Self {
        Self {
            cache_key,
            from,
            to,
            count_back,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}:{}:{}",
            self.cache_key, self.from, self.to, self.count_back
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_display() {
        let settings = SettingsSnapshot {
            metric: Metric::MarketCap,
            ..Default::default()
        };
        let key = CacheKey::new("0xABCdef", Resolution::Minute5, &settings);
        assert_eq!(key.to_string(), "0xabcdef:5:usd:marketcap");
        assert!(key.is_asset("0xabcDEF"));
    }

    #[test]
    fn test_cache_keys_differ_by_metric() {
        let price = SettingsSnapshot::default();
        let mcap = SettingsSnapshot {
            metric: Metric::MarketCap,
            ..price
        };
        assert_ne!(
            CacheKey::new("a", Resolution::Hour1, &price),
            CacheKey::new("a", Resolution::Hour1, &mcap)
        );
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("marketcap".parse::<Metric>().unwrap(), Metric::MarketCap);
        assert_eq!("MCAP".parse::<Metric>().unwrap(), Metric::MarketCap);
        assert_eq!("price".parse::<Metric>().unwrap(), Metric::Price);
        assert!("volume".parse::<Metric>().is_err());
    }

    #[test]
    fn test_has_supply() {
        let mut s = SettingsSnapshot::default();
        assert!(!s.has_supply());
        s.circulating_supply = -5.0;
        assert!(!s.has_supply());
        s.circulating_supply = f64::NAN;
        assert!(!s.has_supply());
        s.circulating_supply = 1_000_000.0;
        assert!(s.has_supply());
    }

    #[test]
    fn test_request_key_display() {
        let key = CacheKey::new("a", Resolution::Day1, &SettingsSnapshot::default());
        let req = RequestKey::new(key, 10, 20, 300);
        assert_eq!(req.to_string(), "a:1D:usd:price|10:20:300");
    }
}
