//! Price / market-cap transformation and display scale selection.
//!
//! All functions here are pure: they never fail and never touch shared state.
//! A missing or invalid supply degrades to the untransformed price bar.

use crate::bar::{Bar, RawBar};
use crate::settings::{Metric, SettingsSnapshot};

/// Lower bound on price decimals shown on the axis.
pub const MIN_PRICE_DECIMALS: u32 = 2;
/// Upper bound on price decimals shown on the axis.
pub const MAX_PRICE_DECIMALS: u32 = 16;

/// Fixed decimals for market-cap values with a known supply.
const MARKET_CAP_DECIMALS: u32 = 2;
/// Significant digits kept visible for price values.
const SIGNIFICANT_DIGITS: i32 = 4;
const EPSILON: f64 = 1e-18;

/// Convert a raw bar into the canonical bar for the given settings.
///
/// Time is normalized to milliseconds. In market-cap mode with a known supply,
/// open/high/low/close are multiplied by the supply; volume is unchanged.
pub fn transform(raw: RawBar, settings: &SettingsSnapshot) -> Bar {
    let bar = Bar::from(raw);
    match settings.metric {
        Metric::MarketCap if settings.has_supply() => bar.scaled(settings.circulating_supply),
        Metric::MarketCap | Metric::Price => bar,
    }
}

/// Transform a batch of raw bars into an ascending, time-unique series.
///
/// When the producer repeats a timestamp the later entry wins.
pub fn transform_series(raw: Vec<RawBar>, settings: &SettingsSnapshot) -> Vec<Bar> {
    let mut bars: Vec<Bar> = raw.into_iter().map(|r| transform(r, settings)).collect();
    bars.sort_by_key(|b| b.time);

    let mut series: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match series.last_mut() {
            Some(prev) if prev.time == bar.time => *prev = bar,
            _ => series.push(bar),
        }
    }
    series
}

/// Choose the widget `pricescale` (a power of ten) for a displayed value.
///
/// Market-cap values with a known supply use a fixed coarse scale. Prices use
/// enough decimals to keep `SIGNIFICANT_DIGITS` visible, clamped to
/// `[MIN_PRICE_DECIMALS, MAX_PRICE_DECIMALS]`.
pub fn select_scale(effective_value: f64, metric: Metric, has_supply: bool) -> u64 {
    if metric == Metric::MarketCap && has_supply {
        return 10u64.pow(MARKET_CAP_DECIMALS);
    }

    let value = if effective_value.is_finite() {
        effective_value.abs().max(EPSILON)
    } else {
        EPSILON
    };
    let magnitude = value.log10().floor() as i32;
    let decimals = (SIGNIFICANT_DIGITS - 1 - magnitude)
        .clamp(MIN_PRICE_DECIMALS as i32, MAX_PRICE_DECIMALS as i32) as u32;
    10u64.pow(decimals)
}
