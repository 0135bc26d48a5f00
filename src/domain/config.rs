//! Typed agent configuration.
//!
//! Built from a [`ConfigPort`](crate::ports::config_port::ConfigPort) by
//! [`load_agent_config`](crate::domain::config_validation::load_agent_config).

use crate::domain::indicator::IndicatorWindows;
use crate::domain::series::SeriesConfig;
use crate::domain::strategy::{BuyStrategy, SellStrategy, StrategyParams};
use chrono::Duration;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Simulated,
    Kraken,
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulated" => Ok(DataSource::Simulated),
            "kraken" => Ok(DataSource::Kraken),
            other => Err(format!("unknown data source '{}'", other)),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Simulated => write!(f, "simulated"),
            DataSource::Kraken => write!(f, "kraken"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Csv,
    Sqlite,
}

impl FromStr for StateBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(StateBackend::Csv),
            "sqlite" => Ok(StateBackend::Sqlite),
            other => Err(format!("unknown state backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataConfig {
    pub source: DataSource,
    /// Instrument id -> data source pair name.
    pub pairs: BTreeMap<String, String>,
}

impl MarketDataConfig {
    pub fn pair_for<'a>(&'a self, instrument: &'a str) -> &'a str {
        self.pairs.get(instrument).map_or(instrument, String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub buy: BuyStrategy,
    pub sell: SellStrategy,
    pub params: StrategyParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingConfig {
    pub reserve: f64,
    pub min_trade: f64,
    /// Zero means "use all available cash".
    pub max_trade: f64,
    pub stop_loss_threshold: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            reserve: 0.0,
            min_trade: 1.0,
            max_trade: 0.0,
            stop_loss_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperConfig {
    pub starting_cash: f64,
    pub quantity_increment: f64,
    pub price_increment: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            starting_cash: 1000.0,
            quantity_increment: 0.0001,
            price_increment: 0.0001,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub instruments: Vec<String>,
    pub interval_minutes: i64,
    pub cancel_after_minutes: i64,
    pub max_rows: usize,
    pub anomaly_threshold: f64,
    pub max_consecutive_failures: u32,
    pub trades_enabled: bool,
    pub simulate_external_calls: bool,
    pub market_data: MarketDataConfig,
    pub windows: IndicatorWindows,
    pub stuck_feed_window: usize,
    pub strategy: StrategyConfig,
    pub trading: TradingConfig,
    pub paper: PaperConfig,
    pub state: StateConfig,
}

impl AgentConfig {
    pub fn series_config(&self) -> SeriesConfig {
        SeriesConfig {
            interval_minutes: self.interval_minutes,
            max_rows: self.max_rows,
            anomaly_threshold: self.anomaly_threshold,
            stuck_window: self.stuck_feed_window,
            min_consecutive_samples: self.windows.min_consecutive_samples(),
        }
    }

    pub fn cancel_after(&self) -> Duration {
        Duration::minutes(self.cancel_after_minutes)
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_minutes.max(0) as u64 * 60)
    }
}
