//! Kraken public REST market data.
//!
//! History comes from the `OHLC` endpoint (open price of each candle), the
//! latest price from the ask of the `Ticker` endpoint. Prices are rounded to
//! 3 decimals. No credentials are needed.

use crate::domain::config::MarketDataConfig;
use crate::domain::error::AgentError;
use crate::domain::price::{round_to, PriceRow};
use crate::ports::market_data_port::MarketDataPort;
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.kraken.com/0/public";

#[derive(Debug, Deserialize)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    result: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct TickerInfo {
    /// Ask: [price, whole lot volume, lot volume]
    a: Vec<String>,
}

pub struct KrakenMarketData {
    client: reqwest::blocking::Client,
    base_url: String,
    pairs: HashMap<String, String>,
}

impl KrakenMarketData {
    pub fn new(config: &MarketDataConfig, instruments: &[String]) -> Result<Self, AgentError> {
        Self::with_base_url(config, instruments, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        config: &MarketDataConfig,
        instruments: &[String],
        base_url: &str,
    ) -> Result<Self, AgentError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("polltrader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::market_data("client", e))?;
        let pairs = instruments
            .iter()
            .map(|i| (i.clone(), config.pair_for(i).to_string()))
            .collect();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pairs,
        })
    }

    fn pair<'a>(&'a self, instrument: &'a str) -> &'a str {
        self.pairs.get(instrument).map_or(instrument, String::as_str)
    }

    fn get(&self, operation: &str, url: &str) -> Result<String, AgentError> {
        debug!(url, "kraken request");
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| AgentError::market_data(operation, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::market_data(operation, format!("HTTP {}", status)));
        }
        resp.text().map_err(|e| AgentError::market_data(operation, e))
    }
}

fn unwrap_result(
    operation: &str,
    pair: &str,
    body: &str,
) -> Result<Value, AgentError> {
    let resp: KrakenResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::market_data(operation, format!("malformed response: {}", e)))?;
    if !resp.error.is_empty() {
        return Err(AgentError::market_data(operation, resp.error.join("; ")));
    }
    resp.result
        .and_then(|mut result| result.remove(pair))
        .ok_or_else(|| AgentError::market_data(operation, format!("no data for pair {}", pair)))
}

fn parse_price(operation: &str, value: &Value) -> Result<f64, AgentError> {
    let price = match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    price
        .map(|p| round_to(p, 3))
        .ok_or_else(|| AgentError::market_data(operation, format!("invalid price {}", value)))
}

/// Parse an `OHLC` response body into price rows for `instrument`.
pub fn parse_ohlc(instrument: &str, pair: &str, body: &str) -> Result<Vec<PriceRow>, AgentError> {
    const OP: &str = "get_ohlc_history";
    let candles = unwrap_result(OP, pair, body)?;
    let candles = candles
        .as_array()
        .ok_or_else(|| AgentError::market_data(OP, "candles are not an array"))?;

    let mut rows = Vec::with_capacity(candles.len());
    for candle in candles {
        let fields = candle
            .as_array()
            .filter(|f| f.len() >= 2)
            .ok_or_else(|| AgentError::market_data(OP, "malformed candle"))?;
        let secs = fields[0]
            .as_i64()
            .ok_or_else(|| AgentError::market_data(OP, "invalid candle time"))?;
        let timestamp = DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| AgentError::market_data(OP, format!("invalid timestamp: {}", secs)))?;
        let open = parse_price(OP, &fields[1])?;
        rows.push(PriceRow::new(instrument, timestamp, open));
    }
    Ok(rows)
}

/// Parse a `Ticker` response body into the current ask price.
pub fn parse_ticker_ask(pair: &str, body: &str) -> Result<f64, AgentError> {
    const OP: &str = "get_latest_price";
    let info = unwrap_result(OP, pair, body)?;
    let ticker: TickerInfo = serde_json::from_value(info)
        .map_err(|e| AgentError::market_data(OP, format!("malformed ticker: {}", e)))?;
    let ask = ticker
        .a
        .first()
        .ok_or_else(|| AgentError::market_data(OP, "ticker has no ask"))?;
    parse_price(OP, &Value::String(ask.clone()))
}

impl MarketDataPort for KrakenMarketData {
    fn get_ohlc_history(
        &mut self,
        instrument: &str,
        interval_minutes: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError> {
        let pair = self.pair(instrument).to_string();
        let url = format!(
            "{}/OHLC?interval={}&pair={}",
            self.base_url, interval_minutes, pair
        );
        let body = self.get("get_ohlc_history", &url)?;
        let mut rows = parse_ohlc(instrument, &pair, &body)?;
        // Rows at or after `now` would collide with the live reading.
        rows.retain(|r| r.timestamp < now);
        Ok(rows)
    }

    fn get_latest_price(&mut self, instrument: &str) -> Result<f64, AgentError> {
        let pair = self.pair(instrument).to_string();
        let url = format!("{}/Ticker?pair={}", self.base_url, pair);
        let body = self.get("get_latest_price", &url)?;
        parse_ticker_ask(&pair, &body)
    }
}
