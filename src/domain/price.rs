//! Price observations and their derived indicator columns.

use chrono::{NaiveDateTime, Timelike};

/// Indicator values attached to a price row. NaN means "not decidable yet".
#[derive(Debug, Clone, Copy)]
pub struct IndicatorColumns {
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
}

impl IndicatorColumns {
    pub const UNDEFINED: IndicatorColumns = IndicatorColumns {
        sma_fast: f64::NAN,
        sma_slow: f64::NAN,
        ema_fast: f64::NAN,
        ema_slow: f64::NAN,
        rsi: f64::NAN,
        macd: f64::NAN,
        macd_signal: f64::NAN,
    };
}

impl Default for IndicatorColumns {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

#[derive(Debug, Clone)]
pub struct PriceRow {
    pub timestamp: NaiveDateTime,
    pub instrument: String,
    pub price: f64,
    pub indicators: IndicatorColumns,
}

impl PriceRow {
    pub fn new(instrument: &str, timestamp: NaiveDateTime, price: f64) -> Self {
        PriceRow {
            timestamp: truncate_to_minute(timestamp),
            instrument: instrument.to_string(),
            price,
            indicators: IndicatorColumns::UNDEFINED,
        }
    }
}

/// Series timestamps have minute resolution.
pub fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Round to `decimals` places, as quotes and balances are reported.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
