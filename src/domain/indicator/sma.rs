//! Simple Moving Average.
//!
//! Two window placements are used by the engine:
//! - unshifted: SMA[i] = mean(P[i-n+1..=i]), first valid at i = n-1
//! - shifted by one bar: SMA[i] = mean(P[i-n..i]), first valid at i = n

pub fn calculate_sma(prices: &[f64], period: usize, shifted: bool) -> Vec<f64> {
    let mut values = vec![f64::NAN; prices.len()];
    if period == 0 {
        return values;
    }

    for (i, value) in values.iter_mut().enumerate() {
        let end = if shifted { i } else { i + 1 };
        if end >= period {
            *value = prices[end - period..end].iter().sum::<f64>() / period as f64;
        }
    }

    values
}
