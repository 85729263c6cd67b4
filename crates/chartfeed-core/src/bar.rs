//! OHLCV bar types.
//!
//! Producers deliver bars in two shapes: the short form `{t,o,h,l,c,v}` used by
//! live streams and the canonical `{time,open,high,low,close,volume}` form used
//! by the REST history endpoint. Both deserialize into [`RawBar`]; numeric
//! fields may arrive as JSON numbers or as numeric strings.

use serde::{Deserialize, Deserializer, Serialize};

/// Times below this magnitude are epoch seconds, above it epoch milliseconds.
///
/// 10^11 seconds is roughly year 5138, 10^11 milliseconds is early 1973.
const SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// Normalize an epoch timestamp (seconds or milliseconds) to milliseconds.
pub fn normalize_time_ms(time: i64) -> i64 {
    if time.unsigned_abs() < SECONDS_THRESHOLD as u64 {
        time.saturating_mul(1000)
    } else {
        time
    }
}

/// Bar as received from a producer, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RawBar {
    #[serde(alias = "t", deserialize_with = "de_time")]
    pub time: i64,
    #[serde(alias = "o", deserialize_with = "de_number")]
    pub open: f64,
    #[serde(alias = "h", deserialize_with = "de_number")]
    pub high: f64,
    #[serde(alias = "l", deserialize_with = "de_number")]
    pub low: f64,
    #[serde(alias = "c", deserialize_with = "de_number")]
    pub close: f64,
    #[serde(alias = "v", default, deserialize_with = "de_volume")]
    pub volume: f64,
}

impl RawBar {
    /// Parse a bar from an arbitrary JSON value.
    pub fn from_value(value: &serde_json::Value) -> crate::Result<Self> {
        Ok(Self::deserialize(value)?)
    }
}

/// Canonical OHLCV bar. `time` is epoch milliseconds once produced by
/// [`crate::transform`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Bar time in epoch milliseconds regardless of the stored unit.
    pub fn time_ms(&self) -> i64 {
        normalize_time_ms(self.time)
    }

    /// Open price, falling back to close when the producer sent no open.
    pub fn open_or_close(&self) -> f64 {
        if self.open.is_finite() && self.open > 0.0 {
            self.open
        } else {
            self.close
        }
    }

    /// Multiply the price fields by `factor`, leaving volume untouched.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            time: self.time,
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
            volume: self.volume,
        }
    }
}

impl From<RawBar> for Bar {
    fn from(raw: RawBar) -> Self {
        Self {
            time: normalize_time_ms(raw.time),
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
        }
    }
}

/// Synthesize the connecting bar emitted between the last cached bar and the
/// first live tick after a (re)subscription.
///
/// Returns `None` unless `tick` is strictly later than `last` with room for a
/// midpoint between them.
pub fn bridge_bar(last: &Bar, tick: &Bar) -> Option<Bar> {
    let last_ms = last.time_ms();
    let tick_ms = tick.time_ms();
    let gap = tick_ms.saturating_sub(last_ms);
    if gap < 2 {
        return None;
    }

    let target = tick.open_or_close();
    Some(Bar {
        time: last_ms.saturating_add(gap / 2),
        open: last.close,
        high: last.close.max(target),
        low: last.close.min(target),
        close: target,
        volume: 0.0,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Number(f64),
    Text(String),
    Null,
}

impl WireNumber {
    fn into_f64<E: serde::de::Error>(self) -> Result<Option<f64>, E> {
        match self {
            Self::Number(n) => Ok(Some(n)),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| E::custom(format!("invalid number {s:?}: {e}"))),
            Self::Null => Ok(None),
        }
    }
}

fn de_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    WireNumber::deserialize(d)?
        .into_f64()?
        .ok_or_else(|| serde::de::Error::custom("price field is null"))
}

fn de_volume<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(WireNumber::deserialize(d)?.into_f64()?.unwrap_or(0.0))
}

fn de_time<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = de_number(d)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("time is not finite"));
    }
    let value = value.round();
    // i64::MAX as f64 rounds up to 2^63, so both bounds are exclusive.
    if value >= i64::MAX as f64 || value < i64::MIN as f64 {
        return Err(serde::de::Error::custom(format!("time {value} out of range")));
    }
    Ok(value as i64)
}
