//! Configuration loading and validation.
//!
//! Reads every section through [`ConfigPort`], applies defaults, and rejects
//! malformed or out-of-range values before the agent starts.

use crate::domain::circuit_breaker::DEFAULT_FAILURE_THRESHOLD;
use crate::domain::config::{
    AgentConfig, DataSource, MarketDataConfig, PaperConfig, StateBackend, StateConfig,
    StrategyConfig, TradingConfig,
};
use crate::domain::error::AgentError;
use crate::domain::indicator::IndicatorWindows;
use crate::domain::series::DEFAULT_ANOMALY_THRESHOLD;
use crate::domain::strategy::{BuyStrategy, SellStrategy, StrategyParams};
use crate::ports::config_port::ConfigPort;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

pub fn load_agent_config(config: &dyn ConfigPort) -> Result<AgentConfig, AgentError> {
    let instruments = parse_instruments(config)?;
    let interval_minutes = positive_int(config, "agent", "interval_minutes", 5)?;
    let cancel_after_minutes = positive_int(config, "agent", "cancel_after_minutes", 20)?;
    let max_rows = positive_int(config, "agent", "max_rows", 2000)? as usize;
    let max_consecutive_failures = u32::try_from(positive_int(
        config,
        "agent",
        "max_consecutive_failures",
        DEFAULT_FAILURE_THRESHOLD as i64,
    )?)
    .map_err(|_| {
        AgentError::invalid(
            "agent",
            "max_consecutive_failures",
            format!("max_consecutive_failures must be at most {}", u32::MAX),
        )
    })?;

    let anomaly_threshold =
        read_value(config, "agent", "anomaly_threshold")?.unwrap_or(DEFAULT_ANOMALY_THRESHOLD);
    if anomaly_threshold <= 0.0 || !anomaly_threshold.is_finite() {
        return Err(AgentError::invalid(
            "agent",
            "anomaly_threshold",
            "anomaly_threshold must be positive",
        ));
    }

    let windows = parse_windows(config)?;
    if max_rows < windows.longest_lookback() {
        return Err(AgentError::invalid(
            "agent",
            "max_rows",
            format!(
                "max_rows must cover the longest indicator window ({})",
                windows.longest_lookback()
            ),
        ));
    }

    let stuck_feed_window = match read_value::<i64>(config, "indicators", "stuck_feed_window")? {
        Some(n) if n < 2 => {
            return Err(AgentError::invalid(
                "indicators",
                "stuck_feed_window",
                "stuck_feed_window must be at least 2",
            ));
        }
        Some(n) => n as usize,
        None => windows.longest_lookback().max(2),
    };

    Ok(AgentConfig {
        instruments: instruments.clone(),
        interval_minutes,
        cancel_after_minutes,
        max_rows,
        anomaly_threshold,
        max_consecutive_failures,
        trades_enabled: config.get_bool("agent", "trades_enabled", false),
        simulate_external_calls: config.get_bool("agent", "simulate_external_calls", true),
        market_data: parse_market_data(config, &instruments)?,
        windows,
        stuck_feed_window,
        strategy: parse_strategy(config)?,
        trading: parse_trading(config)?,
        paper: parse_paper(config)?,
        state: parse_state(config)?,
    })
}

fn read_value<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, AgentError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            AgentError::invalid(section, key, format!("cannot parse '{}'", raw.trim()))
        }),
    }
}

fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, AgentError> {
    let value = read_value(config, section, key)?.unwrap_or(default);
    if value < 1 {
        return Err(AgentError::invalid(
            section,
            key,
            format!("{} must be at least 1", key),
        ));
    }
    Ok(value)
}

fn non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, AgentError> {
    let value: f64 = read_value(config, section, key)?.unwrap_or(default);
    if value < 0.0 || !value.is_finite() {
        return Err(AgentError::invalid(
            section,
            key,
            format!("{} must be non-negative", key),
        ));
    }
    Ok(value)
}

fn parse_instruments(config: &dyn ConfigPort) -> Result<Vec<String>, AgentError> {
    let raw = config
        .get_string("agent", "instruments")
        .ok_or_else(|| AgentError::ConfigMissing {
            section: "agent".to_string(),
            key: "instruments".to_string(),
        })?;
    let mut instruments: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = item.to_uppercase();
        if instruments.contains(&id) {
            return Err(AgentError::invalid(
                "agent",
                "instruments",
                format!("instrument {} listed twice", id),
            ));
        }
        instruments.push(id);
    }
    if instruments.is_empty() {
        return Err(AgentError::invalid(
            "agent",
            "instruments",
            "at least one instrument is required",
        ));
    }
    Ok(instruments)
}

fn parse_market_data(
    config: &dyn ConfigPort,
    instruments: &[String],
) -> Result<MarketDataConfig, AgentError> {
    let source = match config.get_string("market_data", "source") {
        None => DataSource::Simulated,
        Some(raw) => raw
            .parse()
            .map_err(|e: String| AgentError::invalid("market_data", "source", e))?,
    };

    let mut pairs = BTreeMap::new();
    if let Some(raw) = config.get_string("market_data", "pairs") {
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (instrument, pair) = item.split_once(':').ok_or_else(|| {
                AgentError::invalid(
                    "market_data",
                    "pairs",
                    format!("expected INSTRUMENT:PAIR, got '{}'", item),
                )
            })?;
            let instrument = instrument.trim().to_uppercase();
            if !instruments.contains(&instrument) {
                return Err(AgentError::invalid(
                    "market_data",
                    "pairs",
                    format!("{} is not a configured instrument", instrument),
                ));
            }
            pairs.insert(instrument, pair.trim().to_string());
        }
    }

    Ok(MarketDataConfig { source, pairs })
}

fn parse_windows(config: &dyn ConfigPort) -> Result<IndicatorWindows, AgentError> {
    let d = IndicatorWindows::default();
    let window = |key: &str, default: usize| -> Result<usize, AgentError> {
        positive_int(config, "indicators", key, default as i64).map(|v| v as usize)
    };
    let windows = IndicatorWindows {
        sma_fast: window("sma_fast", d.sma_fast)?,
        sma_slow: window("sma_slow", d.sma_slow)?,
        ema_fast: window("ema_fast", d.ema_fast)?,
        ema_slow: window("ema_slow", d.ema_slow)?,
        rsi_period: window("rsi_period", d.rsi_period)?,
        macd_fast: window("macd_fast", d.macd_fast)?,
        macd_slow: window("macd_slow", d.macd_slow)?,
        macd_signal: window("macd_signal", d.macd_signal)?,
    };

    if windows.sma_fast > windows.sma_slow {
        return Err(AgentError::invalid(
            "indicators",
            "sma_fast",
            "sma_fast must not exceed sma_slow",
        ));
    }
    if windows.ema_fast > windows.ema_slow {
        return Err(AgentError::invalid(
            "indicators",
            "ema_fast",
            "ema_fast must not exceed ema_slow",
        ));
    }
    if windows.macd_fast >= windows.macd_slow {
        return Err(AgentError::invalid(
            "indicators",
            "macd_fast",
            "macd_fast must be less than macd_slow",
        ));
    }
    Ok(windows)
}

fn parse_strategy(config: &dyn ConfigPort) -> Result<StrategyConfig, AgentError> {
    let buy: BuyStrategy = config
        .get_string("strategy", "buy")
        .unwrap_or_else(|| BuyStrategy::EmaCrossoverRsi.name().to_string())
        .parse()?;
    let sell: SellStrategy = config
        .get_string("strategy", "sell")
        .unwrap_or_else(|| SellStrategy::PriceEmaCrossoverRsi.name().to_string())
        .parse()?;

    let d = StrategyParams::default();
    let params = StrategyParams {
        buy_rsi_threshold: rsi_threshold(config, "buy_rsi_threshold", d.buy_rsi_threshold)?,
        sell_rsi_threshold: rsi_threshold(config, "sell_rsi_threshold", d.sell_rsi_threshold)?,
        profit_percentage: non_negative(config, "strategy", "profit_percentage", d.profit_percentage)?,
        buy_below_moving_average: non_negative(
            config,
            "strategy",
            "buy_below_moving_average",
            d.buy_below_moving_average,
        )?,
        tsl_percentage: non_negative(config, "strategy", "tsl_percentage", d.tsl_percentage)?,
    };
    if params.tsl_percentage >= 1.0 {
        return Err(AgentError::invalid(
            "strategy",
            "tsl_percentage",
            "tsl_percentage must be below 1",
        ));
    }

    Ok(StrategyConfig { buy, sell, params })
}

fn rsi_threshold(config: &dyn ConfigPort, key: &str, default: f64) -> Result<f64, AgentError> {
    let value: f64 = read_value(config, "strategy", key)?.unwrap_or(default);
    if !(0.0..=100.0).contains(&value) {
        return Err(AgentError::invalid(
            "strategy",
            key,
            format!("{} must be between 0 and 100", key),
        ));
    }
    Ok(value)
}

fn parse_trading(config: &dyn ConfigPort) -> Result<TradingConfig, AgentError> {
    let d = TradingConfig::default();
    let trading = TradingConfig {
        reserve: non_negative(config, "trading", "reserve", d.reserve)?,
        min_trade: non_negative(config, "trading", "min_trade", d.min_trade)?,
        max_trade: non_negative(config, "trading", "max_trade", d.max_trade)?,
        stop_loss_threshold: non_negative(
            config,
            "trading",
            "stop_loss_threshold",
            d.stop_loss_threshold,
        )?,
    };
    if trading.max_trade > 0.0 && trading.max_trade < trading.min_trade {
        return Err(AgentError::invalid(
            "trading",
            "max_trade",
            "max_trade must be 0 or at least min_trade",
        ));
    }
    if trading.stop_loss_threshold >= 1.0 {
        return Err(AgentError::invalid(
            "trading",
            "stop_loss_threshold",
            "stop_loss_threshold must be below 1",
        ));
    }
    Ok(trading)
}

fn parse_paper(config: &dyn ConfigPort) -> Result<PaperConfig, AgentError> {
    let d = PaperConfig::default();
    Ok(PaperConfig {
        starting_cash: non_negative(config, "paper", "starting_cash", d.starting_cash)?,
        quantity_increment: non_negative(
            config,
            "paper",
            "quantity_increment",
            d.quantity_increment,
        )?,
        price_increment: non_negative(config, "paper", "price_increment", d.price_increment)?,
    })
}

fn parse_state(config: &dyn ConfigPort) -> Result<StateConfig, AgentError> {
    let backend = match config.get_string("state", "backend") {
        None => StateBackend::Csv,
        Some(raw) => raw
            .parse()
            .map_err(|e: String| AgentError::invalid("state", "backend", e))?,
    };
    let path = config
        .get_string("state", "path")
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "state".to_string());
    Ok(StateConfig {
        backend,
        path: PathBuf::from(path.trim()),
    })
}
