//! Retention-bounded price series per instrument.
//!
//! The store is the single owner of every [`PriceRow`]. Rows are kept in time
//! order; an observation is only appended when it is strictly newer than the
//! last row, within the anomaly threshold of the last price, and does not
//! complete a run of identical readings.

use crate::domain::error::AgentError;
use crate::domain::indicator::{ComputeMode, IndicatorEngine};
use crate::domain::price::{truncate_to_minute, PriceRow};
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Relative change from the previous reading exceeds the threshold.
    AnomalousDelta { delta: f64 },
    /// The last `window` readings are bit-identical.
    StuckFeed { window: usize },
    DuplicateTimestamp,
    OutOfOrder,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AnomalousDelta { delta } => {
                write!(f, "price moved {:.2}% from previous reading", delta * 100.0)
            }
            RejectReason::StuckFeed { window } => {
                write!(f, "last {} readings are identical", window)
            }
            RejectReason::DuplicateTimestamp => write!(f, "duplicate timestamp"),
            RejectReason::OutOfOrder => write!(f, "timestamp older than last row"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesConfig {
    pub interval_minutes: i64,
    pub max_rows: usize,
    pub anomaly_threshold: f64,
    pub stuck_window: usize,
    pub min_consecutive_samples: usize,
}

impl SeriesConfig {
    /// Largest spacing between two samples that still counts as continuous.
    pub fn max_spacing(&self) -> Duration {
        Duration::minutes((self.interval_minutes + 1) * 2)
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    config: SeriesConfig,
    series: BTreeMap<String, Vec<PriceRow>>,
}

impl TimeSeriesStore {
    pub fn new(config: SeriesConfig, instruments: &[String]) -> Self {
        let series = instruments
            .iter()
            .map(|i| (i.clone(), Vec::new()))
            .collect();
        TimeSeriesStore { config, series }
    }

    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Rows of an instrument in time order; empty for unknown instruments.
    pub fn rows(&self, instrument: &str) -> &[PriceRow] {
        self.series.get(instrument).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.series.get(instrument).map_or(0, Vec::len)
    }

    pub fn last(&self, instrument: &str) -> Option<&PriceRow> {
        self.series.get(instrument).and_then(|rows| rows.last())
    }

    pub fn last_price(&self, instrument: &str) -> Option<f64> {
        self.last(instrument).map(|r| r.price)
    }

    pub fn ingest(
        &mut self,
        instrument: &str,
        price: f64,
        observed_at: NaiveDateTime,
    ) -> Result<IngestOutcome, AgentError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(AgentError::InvalidPrice {
                instrument: instrument.to_string(),
                price,
            });
        }

        let timestamp = truncate_to_minute(observed_at);
        let rows = self.series.entry(instrument.to_string()).or_default();

        if let Some(last) = rows.last() {
            if timestamp == last.timestamp {
                return Ok(IngestOutcome::Rejected(RejectReason::DuplicateTimestamp));
            }
            if timestamp < last.timestamp {
                return Ok(IngestOutcome::Rejected(RejectReason::OutOfOrder));
            }
            let delta = (price - last.price).abs() / last.price;
            if delta > self.config.anomaly_threshold {
                return Ok(IngestOutcome::Rejected(RejectReason::AnomalousDelta { delta }));
            }
        }

        rows.push(PriceRow::new(instrument, timestamp, price));

        let window = self.config.stuck_window;
        if rows.len() >= window {
            let bits = price.to_bits();
            if rows.iter().rev().take(window).all(|r| r.price.to_bits() == bits) {
                rows.pop();
                return Ok(IngestOutcome::Rejected(RejectReason::StuckFeed { window }));
            }
        }

        Ok(IngestOutcome::Accepted)
    }

    /// Replace an instrument's rows with a freshly fetched history.
    /// Returns the number of rows kept.
    pub fn reload(&mut self, instrument: &str, history: Vec<PriceRow>) -> usize {
        let mut rows: Vec<PriceRow> = Vec::with_capacity(history.len());
        for mut row in history {
            if !row.price.is_finite() || row.price <= 0.0 {
                continue;
            }
            row.timestamp = truncate_to_minute(row.timestamp);
            if rows.last().is_some_and(|last| row.timestamp <= last.timestamp) {
                continue;
            }
            row.instrument = instrument.to_string();
            rows.push(row);
        }
        let excess = rows.len().saturating_sub(self.config.max_rows);
        rows.drain(..excess);
        let kept = rows.len();
        self.series.insert(instrument.to_string(), rows);
        kept
    }

    pub fn recompute(&mut self, instrument: &str, engine: &IndicatorEngine, mode: ComputeMode) {
        if let Some(rows) = self.series.get_mut(instrument) {
            engine.recompute(rows, mode);
        }
    }

    /// True when the instrument's series cannot be trusted for incremental
    /// computation at `now`.
    pub fn instrument_has_gap(&self, instrument: &str, now: NaiveDateTime) -> bool {
        let rows = match self.series.get(instrument) {
            Some(rows) if !rows.is_empty() => rows,
            _ => return true,
        };
        let bound = self.config.max_spacing();

        if let Some(last) = rows.last() {
            if now - last.timestamp > bound {
                return true;
            }
        }

        let pairs = self.config.min_consecutive_samples;
        let tail_start = rows.len().saturating_sub(pairs + 1);
        rows[tail_start..]
            .windows(2)
            .any(|w| w[1].timestamp - w[0].timestamp > bound)
    }

    /// True when any tracked instrument has a gap, or nothing is tracked.
    pub fn has_gap(&self, now: NaiveDateTime) -> bool {
        self.series.is_empty()
            || self
                .series
                .keys()
                .any(|instrument| self.instrument_has_gap(instrument, now))
    }

    /// Drop the oldest rows of every instrument beyond `max_rows`.
    pub fn evict_to(&mut self, max_rows: usize) -> usize {
        let mut evicted = 0;
        for rows in self.series.values_mut() {
            let excess = rows.len().saturating_sub(max_rows);
            rows.drain(..excess);
            evicted += excess;
        }
        evicted
    }

    /// All rows of all instruments, for persistence.
    pub fn all_rows(&self) -> impl Iterator<Item = &PriceRow> {
        self.series.values().flat_map(|rows| rows.iter())
    }
}
