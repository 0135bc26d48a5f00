//! Exponential Moving Average.
//!
//! k = 2/(n+1), EMA[i] = P[i]*k + EMA[i-1]*(1-k).
//!
//! Two seedings are provided:
//! - [`calculate_ema`]: recursion starts at the first price (EMA[0] = P[0]),
//!   values before index n-1 are masked out. This is the unadjusted form used
//!   for the EMA columns.
//! - [`calculate_seeded_ema`]: seeded with the SMA of the first n values at
//!   index n-1. Used by MACD.

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.is_empty() {
        return values;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[0];

    for (i, &price) in prices.iter().enumerate() {
        if i > 0 {
            ema = price * k + ema * (1.0 - k);
        }
        if i + 1 >= period {
            values[i] = ema;
        }
    }

    values
}

pub fn calculate_seeded_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return values;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    values[period - 1] = ema;

    for i in period..prices.len() {
        ema = prices[i] * k + ema * (1.0 - k);
        values[i] = ema;
    }

    values
}
