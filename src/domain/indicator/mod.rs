//! Technical indicator engine.
//!
//! The engine derives every indicator column of a [`PriceRow`] slice from the
//! raw price column. Columns are recomputed over the whole retained series on
//! each call, so a history reload never leaves partial state behind.
//!
//! Two modes exist because history backfills and live ticks place the SMA
//! window differently:
//! - [`ComputeMode::Backfill`]: SMA excludes the current bar (shift by one)
//! - [`ComputeMode::Live`]: SMA includes the current bar

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use ema::{calculate_ema, calculate_seeded_ema};
pub use macd::{calculate_macd, MacdSeries};
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;

use crate::domain::price::PriceRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMode {
    Backfill,
    Live,
}

impl fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeMode::Backfill => write!(f, "backfill"),
            ComputeMode::Live => write!(f, "live"),
        }
    }
}

/// Window sizes, in samples, for every indicator column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorWindows {
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorWindows {
    fn default() -> Self {
        IndicatorWindows {
            sma_fast: 12,
            sma_slow: 48,
            ema_fast: 12,
            ema_slow: 48,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 7,
        }
    }
}

impl IndicatorWindows {
    /// The largest single window in use.
    pub fn longest_lookback(&self) -> usize {
        [
            self.sma_fast,
            self.sma_slow,
            self.ema_fast,
            self.ema_slow,
            self.rsi_period,
            self.macd_fast,
            self.macd_slow,
            self.macd_signal,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Number of trailing samples that must be evenly spaced before the
    /// series is considered continuous.
    pub fn min_consecutive_samples(&self) -> usize {
        self.rsi_period.max(self.sma_fast)
    }
}

impl fmt::Display for IndicatorWindows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SMA({},{}) EMA({},{}) RSI({}) MACD({},{},{})",
            self.sma_fast,
            self.sma_slow,
            self.ema_fast,
            self.ema_slow,
            self.rsi_period,
            self.macd_fast,
            self.macd_slow,
            self.macd_signal
        )
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    windows: IndicatorWindows,
}

impl IndicatorEngine {
    pub fn new(windows: IndicatorWindows) -> Self {
        IndicatorEngine { windows }
    }

    pub fn windows(&self) -> &IndicatorWindows {
        &self.windows
    }

    /// Recompute all indicator columns of `rows` in place.
    pub fn recompute(&self, rows: &mut [PriceRow], mode: ComputeMode) {
        let prices: Vec<f64> = rows.iter().map(|r| r.price).collect();
        let w = &self.windows;
        let shifted = mode == ComputeMode::Backfill;

        let sma_fast = calculate_sma(&prices, w.sma_fast, shifted);
        let sma_slow = calculate_sma(&prices, w.sma_slow, shifted);
        let ema_fast = calculate_ema(&prices, w.ema_fast);
        let ema_slow = calculate_ema(&prices, w.ema_slow);
        let rsi = calculate_rsi(&prices, w.rsi_period);
        let macd = calculate_macd(&prices, w.macd_fast, w.macd_slow, w.macd_signal);

        for (i, row) in rows.iter_mut().enumerate() {
            let c = &mut row.indicators;
            c.sma_fast = sma_fast[i];
            c.sma_slow = sma_slow[i];
            c.ema_fast = ema_fast[i];
            c.ema_slow = ema_slow[i];
            c.rsi = rsi[i];
            c.macd = macd.line[i];
            c.macd_signal = macd.signal[i];
        }
    }
}
