//! Simulated market data: a bounded random walk per instrument.

use crate::domain::error::AgentError;
use crate::domain::price::{round_to, PriceRow};
use crate::ports::market_data_port::MarketDataPort;
use chrono::{Duration, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Largest relative move between two consecutive simulated prices.
pub const DEFAULT_MAX_STEP: f64 = 0.005;

/// Rows returned by a history request.
pub const HISTORY_ROWS: usize = 720;

fn base_price(instrument: &str) -> f64 {
    match instrument {
        "BTC" => 60_000.0,
        "ETH" => 3_000.0,
        "SOL" => 150.0,
        "DOGE" => 0.15,
        _ => 100.0,
    }
}

pub struct SimulatedMarketData {
    rng: StdRng,
    prices: HashMap<String, f64>,
    max_step: f64,
}

impl SimulatedMarketData {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Reproducible walk for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        SimulatedMarketData {
            rng,
            prices: HashMap::new(),
            max_step: DEFAULT_MAX_STEP,
        }
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = max_step.abs();
        self
    }

    /// Start an instrument's walk at `price` instead of its default level.
    pub fn with_price(mut self, instrument: &str, price: f64) -> Self {
        self.prices.insert(instrument.to_string(), price);
        self
    }

    fn current(&self, instrument: &str) -> f64 {
        self.prices
            .get(instrument)
            .copied()
            .unwrap_or_else(|| base_price(instrument))
    }

    fn step(&mut self, from: f64) -> f64 {
        let change = if self.max_step > 0.0 {
            self.rng.gen_range(-self.max_step..=self.max_step)
        } else {
            0.0
        };
        // Never round down to zero for very cheap instruments.
        let next = round_to(from * (1.0 + change), 3);
        if next > 0.0 { next } else { from }
    }

    /// `HISTORY_ROWS` rows spaced `interval_minutes` apart, ending one
    /// interval before the boundary at or preceding `now`, and ending at the
    /// walk's current price.
    fn history_until(
        &mut self,
        instrument: &str,
        interval_minutes: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError> {
        if interval_minutes <= 0 {
            return Err(AgentError::market_data(
                "get_ohlc_history",
                format!("invalid interval {}", interval_minutes),
            ));
        }
        let now = now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now);
        let minutes_past = i64::from(now.minute()) % interval_minutes;
        let end = now - Duration::minutes(minutes_past + interval_minutes);

        // Walk backwards from the current price so the history joins up
        // with the next live reading.
        let mut prices = Vec::with_capacity(HISTORY_ROWS);
        let mut price = round_to(self.current(instrument), 3);
        for _ in 0..HISTORY_ROWS {
            prices.push(price);
            price = self.step(price);
        }
        prices.reverse();

        let rows = prices
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let back = (HISTORY_ROWS - 1 - i) as i64 * interval_minutes;
                PriceRow::new(instrument, end - Duration::minutes(back), p)
            })
            .collect();
        Ok(rows)
    }
}

impl Default for SimulatedMarketData {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataPort for SimulatedMarketData {
    fn get_ohlc_history(
        &mut self,
        instrument: &str,
        interval_minutes: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError> {
        self.history_until(instrument, interval_minutes, now)
    }

    fn get_latest_price(&mut self, instrument: &str) -> Result<f64, AgentError> {
        let next = self.step(self.current(instrument));
        self.prices.insert(instrument.to_string(), next);
        Ok(next)
    }
}
