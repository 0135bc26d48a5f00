//! MACD (Moving Average Convergence Divergence).
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//!
//! Both EMAs are SMA-seeded. The line is defined from index max(fast, slow) - 1,
//! the signal line `signal - 1` bars later.

use crate::domain::indicator::ema::calculate_seeded_ema;

pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
}

pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let mut line = vec![f64::NAN; prices.len()];
    let mut signal = vec![f64::NAN; prices.len()];

    if prices.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return MacdSeries { line, signal };
    }

    let ema_fast = calculate_seeded_ema(prices, fast);
    let ema_slow = calculate_seeded_ema(prices, slow);

    let line_start = fast.max(slow) - 1;
    if prices.len() <= line_start {
        return MacdSeries { line, signal };
    }

    for i in line_start..prices.len() {
        line[i] = ema_fast[i] - ema_slow[i];
    }

    let smoothed = calculate_seeded_ema(&line[line_start..], signal_period);
    signal[line_start..].copy_from_slice(&smoothed);

    MacdSeries { line, signal }
}
