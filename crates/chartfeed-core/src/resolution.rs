//! Bar resolutions.
//!
//! The chart widget speaks in its own resolution strings (`"1"`, `"60"`,
//! `"1D"`), the history provider in period names (`"1m"`, `"1h"`, `"1d"`).

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket width a bar represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    Second1,
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl Resolution {
    /// Every resolution the feed supports, finest first.
    pub const ALL: [Resolution; 9] = [
        Self::Second1,
        Self::Minute1,
        Self::Minute5,
        Self::Minute15,
        Self::Minute30,
        Self::Hour1,
        Self::Hour4,
        Self::Day1,
        Self::Week1,
    ];

    /// Bucket width in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Second1 => 1,
            Self::Minute1 => 60,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Minute30 => 1_800,
            Self::Hour1 => 3_600,
            Self::Hour4 => 14_400,
            Self::Day1 => 86_400,
            Self::Week1 => 604_800,
        }
    }

    /// Widget resolution string.
    pub fn as_widget_str(&self) -> &'static str {
        match self {
            Self::Second1 => "1S",
            Self::Minute1 => "1",
            Self::Minute5 => "5",
            Self::Minute15 => "15",
            Self::Minute30 => "30",
            Self::Hour1 => "60",
            Self::Hour4 => "240",
            Self::Day1 => "1D",
            Self::Week1 => "1W",
        }
    }

    /// Period name used by the history provider and live stream payloads.
    pub fn period(&self) -> &'static str {
        match self {
            Self::Second1 => "1s",
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Minute30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
            Self::Week1 => "1w",
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.seconds() < 86_400
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_widget_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let res = match s.trim() {
            "1S" | "1s" => Self::Second1,
            "1" | "1m" => Self::Minute1,
            "5" | "5m" => Self::Minute5,
            "15" | "15m" => Self::Minute15,
            "30" | "30m" => Self::Minute30,
            "60" | "1h" => Self::Hour1,
            "240" | "4h" => Self::Hour4,
            "D" | "1D" | "1d" => Self::Day1,
            "W" | "1W" | "1w" => Self::Week1,
            other => return Err(CoreError::InvalidResolution(other.to_string())),
        };
        Ok(res)
    }
}

impl TryFrom<String> for Resolution {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.as_widget_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_widget_and_period_forms() {
        assert_eq!("60".parse::<Resolution>().unwrap(), Resolution::Hour1);
        assert_eq!("1h".parse::<Resolution>().unwrap(), Resolution::Hour1);
        assert_eq!("D".parse::<Resolution>().unwrap(), Resolution::Day1);
        assert_eq!("1S".parse::<Resolution>().unwrap(), Resolution::Second1);
        assert!("7".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_widget_string_roundtrips_for_all() {
        for res in Resolution::ALL {
            assert_eq!(res.as_widget_str().parse::<Resolution>().unwrap(), res);
            assert_eq!(res.period().parse::<Resolution>().unwrap(), res);
        }
    }

    #[test]
    fn test_intraday() {
        assert!(Resolution::Hour4.is_intraday());
        assert!(!Resolution::Day1.is_intraday());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Resolution::Minute15).unwrap();
        assert_eq!(json, "\"15\"");
        let back: Resolution = serde_json::from_str("\"1W\"").unwrap();
        assert_eq!(back, Resolution::Week1);
    }
}
