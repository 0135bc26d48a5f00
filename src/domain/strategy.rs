//! Buy and sell strategy registry.
//!
//! Strategy names from configuration resolve to [`BuyStrategy`] and
//! [`SellStrategy`] at load time, so an unknown name never reaches a tick.
//! Each kind maps to a plain predicate function over the enriched series.
//! Predicates inspect only the two most recent rows (the trailing stop also
//! scans the rows since the position opened) and return `false` whenever a
//! column they read is NaN.

use crate::domain::error::AgentError;
use crate::domain::position::Position;
use crate::domain::price::PriceRow;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub type BuyPredicate = fn(&[PriceRow], &StrategyParams) -> bool;
pub type SellPredicate = fn(&Position, &[PriceRow], &StrategyParams) -> bool;

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    pub buy_rsi_threshold: f64,
    pub sell_rsi_threshold: f64,
    pub profit_percentage: f64,
    /// Discount below the fast SMA required by `sma_rsi_threshold`.
    pub buy_below_moving_average: f64,
    pub tsl_percentage: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            buy_rsi_threshold: 40.0,
            sell_rsi_threshold: 70.0,
            profit_percentage: 0.01,
            buy_below_moving_average: 0.0075,
            tsl_percentage: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyStrategy {
    SmaCrossoverRsi,
    EmaCrossoverRsi,
    SmaRsiThreshold,
}

impl BuyStrategy {
    pub const ALL: [BuyStrategy; 3] = [
        BuyStrategy::SmaCrossoverRsi,
        BuyStrategy::EmaCrossoverRsi,
        BuyStrategy::SmaRsiThreshold,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuyStrategy::SmaCrossoverRsi => "sma_crossover_rsi",
            BuyStrategy::EmaCrossoverRsi => "ema_crossover_rsi",
            BuyStrategy::SmaRsiThreshold => "sma_rsi_threshold",
        }
    }

    pub fn predicate(self) -> BuyPredicate {
        match self {
            BuyStrategy::SmaCrossoverRsi => buy_sma_crossover_rsi,
            BuyStrategy::EmaCrossoverRsi => buy_ema_crossover_rsi,
            BuyStrategy::SmaRsiThreshold => buy_sma_rsi_threshold,
        }
    }
}

impl fmt::Display for BuyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuyStrategy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        BuyStrategy::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AgentError::UnknownStrategy {
                side: "buy".to_string(),
                name: wanted.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellStrategy {
    SmaCrossoverRsi,
    EmaCrossoverRsi,
    PriceEmaCrossoverRsi,
    AboveBuy,
    TrailingStopLoss,
}

impl SellStrategy {
    pub const ALL: [SellStrategy; 5] = [
        SellStrategy::SmaCrossoverRsi,
        SellStrategy::EmaCrossoverRsi,
        SellStrategy::PriceEmaCrossoverRsi,
        SellStrategy::AboveBuy,
        SellStrategy::TrailingStopLoss,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SellStrategy::SmaCrossoverRsi => "sma_crossover_rsi",
            SellStrategy::EmaCrossoverRsi => "ema_crossover_rsi",
            SellStrategy::PriceEmaCrossoverRsi => "price_ema_crossover_rsi",
            SellStrategy::AboveBuy => "above_buy",
            SellStrategy::TrailingStopLoss => "trailing_stop_loss",
        }
    }

    pub fn predicate(self) -> SellPredicate {
        match self {
            SellStrategy::SmaCrossoverRsi => sell_sma_crossover_rsi,
            SellStrategy::EmaCrossoverRsi => sell_ema_crossover_rsi,
            SellStrategy::PriceEmaCrossoverRsi => sell_price_ema_crossover_rsi,
            SellStrategy::AboveBuy => sell_above_buy,
            SellStrategy::TrailingStopLoss => sell_trailing_stop_loss,
        }
    }
}

impl fmt::Display for SellStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SellStrategy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SellStrategy::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AgentError::UnknownStrategy {
                side: "sell".to_string(),
                name: wanted.to_string(),
            })
    }
}

/// The active buy and sell strategies with their parameters.
#[derive(Debug, Clone)]
pub struct StrategyEvaluator {
    buy: BuyStrategy,
    sell: SellStrategy,
    params: StrategyParams,
}

impl StrategyEvaluator {
    pub fn new(buy: BuyStrategy, sell: SellStrategy, params: StrategyParams) -> Self {
        StrategyEvaluator { buy, sell, params }
    }

    pub fn from_names(buy: &str, sell: &str, params: StrategyParams) -> Result<Self, AgentError> {
        Ok(StrategyEvaluator::new(buy.parse()?, sell.parse()?, params))
    }

    pub fn buy_strategy(&self) -> BuyStrategy {
        self.buy
    }

    pub fn sell_strategy(&self) -> SellStrategy {
        self.sell
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn should_buy(&self, instrument: &str, rows: &[PriceRow]) -> bool {
        let signal = (self.buy.predicate())(rows, &self.params);
        debug!(instrument, strategy = %self.buy, signal, "buy signal evaluated");
        signal
    }

    pub fn should_sell(&self, position: &Position, rows: &[PriceRow]) -> bool {
        let signal = (self.sell.predicate())(position, rows, &self.params);
        debug!(
            position = %position.id,
            instrument = %position.instrument,
            strategy = %self.sell,
            signal,
            "sell signal evaluated"
        );
        signal
    }
}

fn last_two(rows: &[PriceRow]) -> Option<(&PriceRow, &PriceRow)> {
    match rows {
        [.., prev, curr] => Some((prev, curr)),
        _ => None,
    }
}

fn defined(values: &[f64]) -> bool {
    values.iter().all(|v| !v.is_nan())
}

fn crossed_up(prev_fast: f64, prev_slow: f64, fast: f64, slow: f64) -> bool {
    prev_fast < prev_slow && fast >= slow
}

fn crossed_down(prev_fast: f64, prev_slow: f64, fast: f64, slow: f64) -> bool {
    prev_fast > prev_slow && fast <= slow
}

fn profit_met(position: &Position, price: f64, params: &StrategyParams) -> bool {
    price >= position.profit_target(params.profit_percentage)
}

pub fn buy_sma_crossover_rsi(rows: &[PriceRow], params: &StrategyParams) -> bool {
    let Some((prev, curr)) = last_two(rows) else {
        return false;
    };
    let (p, c) = (&prev.indicators, &curr.indicators);
    if !defined(&[p.sma_fast, p.sma_slow, c.sma_fast, c.sma_slow, c.rsi]) {
        return false;
    }
    crossed_up(p.sma_fast, p.sma_slow, c.sma_fast, c.sma_slow) && c.rsi > params.buy_rsi_threshold
}

pub fn buy_ema_crossover_rsi(rows: &[PriceRow], params: &StrategyParams) -> bool {
    let Some((prev, curr)) = last_two(rows) else {
        return false;
    };
    let (p, c) = (&prev.indicators, &curr.indicators);
    if !defined(&[p.ema_fast, p.ema_slow, c.ema_fast, c.ema_slow, c.rsi]) {
        return false;
    }
    crossed_up(p.ema_fast, p.ema_slow, c.ema_fast, c.ema_slow) && c.rsi > params.buy_rsi_threshold
}

pub fn buy_sma_rsi_threshold(rows: &[PriceRow], params: &StrategyParams) -> bool {
    let Some(curr) = rows.last() else {
        return false;
    };
    let c = &curr.indicators;
    if !defined(&[c.sma_fast, c.rsi]) {
        return false;
    }
    let ceiling = c.sma_fast - c.sma_fast * params.buy_below_moving_average;
    curr.price <= ceiling && c.rsi <= params.buy_rsi_threshold
}

pub fn sell_sma_crossover_rsi(position: &Position, rows: &[PriceRow], params: &StrategyParams) -> bool {
    let Some((prev, curr)) = last_two(rows) else {
        return false;
    };
    let (p, c) = (&prev.indicators, &curr.indicators);
    if !defined(&[p.sma_fast, p.sma_slow, c.sma_fast, c.sma_slow, c.rsi]) {
        return false;
    }
    crossed_down(p.sma_fast, p.sma_slow, c.sma_fast, c.sma_slow)
        && c.rsi <= params.sell_rsi_threshold
        && profit_met(position, curr.price, params)
}

pub fn sell_ema_crossover_rsi(position: &Position, rows: &[PriceRow], params: &StrategyParams) -> bool {
    let Some((prev, curr)) = last_two(rows) else {
        return false;
    };
    let (p, c) = (&prev.indicators, &curr.indicators);
    if !defined(&[p.ema_fast, p.ema_slow, c.ema_fast, c.ema_slow, c.rsi]) {
        return false;
    }
    crossed_down(p.ema_fast, p.ema_slow, c.ema_fast, c.ema_slow)
        && c.rsi <= params.sell_rsi_threshold
        && profit_met(position, curr.price, params)
}

pub fn sell_price_ema_crossover_rsi(
    position: &Position,
    rows: &[PriceRow],
    params: &StrategyParams,
) -> bool {
    let Some((prev, curr)) = last_two(rows) else {
        return false;
    };
    let (p, c) = (&prev.indicators, &curr.indicators);
    if !defined(&[p.ema_slow, c.ema_slow, c.rsi]) {
        return false;
    }
    crossed_down(prev.price, p.ema_slow, curr.price, c.ema_slow)
        && c.rsi <= params.sell_rsi_threshold
        && profit_met(position, curr.price, params)
}

pub fn sell_above_buy(position: &Position, rows: &[PriceRow], params: &StrategyParams) -> bool {
    match rows.last() {
        Some(curr) => curr.price > position.profit_target(params.profit_percentage),
        None => false,
    }
}

pub fn sell_trailing_stop_loss(
    position: &Position,
    rows: &[PriceRow],
    params: &StrategyParams,
) -> bool {
    let Some(curr) = rows.last() else {
        return false;
    };
    let peak = rows
        .iter()
        .filter(|r| r.timestamp > position.opened_at)
        .map(|r| r.price)
        .fold(f64::NAN, f64::max);
    if peak.is_nan() {
        return false;
    }
    curr.price < peak * (1.0 - params.tsl_percentage) && profit_met(position, curr.price, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::IndicatorColumns;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t(minute: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + Duration::minutes(minute)
    }

    fn row(minute: i64, price: f64, indicators: IndicatorColumns) -> PriceRow {
        let mut r = PriceRow::new("ETH", t(minute), price);
        r.indicators = indicators;
        r
    }

    fn sma(fast: f64, slow: f64, rsi: f64) -> IndicatorColumns {
        IndicatorColumns {
            sma_fast: fast,
            sma_slow: slow,
            rsi,
            ..IndicatorColumns::UNDEFINED
        }
    }

    fn ema(fast: f64, slow: f64, rsi: f64) -> IndicatorColumns {
        IndicatorColumns {
            ema_fast: fast,
            ema_slow: slow,
            rsi,
            ..IndicatorColumns::UNDEFINED
        }
    }

    fn params(buy_rsi: f64) -> StrategyParams {
        StrategyParams {
            buy_rsi_threshold: buy_rsi,
            ..StrategyParams::default()
        }
    }

    fn bought_at(price: f64) -> Position {
        Position::pending_buy("ord-1", "ETH", 1.0, price, t(0))
    }

    #[test]
    fn sma_crossover_buy_fires_on_cross_with_rsi() {
        let rows = vec![row(0, 10.0, sma(10.0, 10.2, 45.0)), row(5, 10.3, sma(10.3, 10.2, 55.0))];
        assert!(buy_sma_crossover_rsi(&rows, &params(50.0)));
    }

    #[test]
    fn sma_crossover_buy_needs_rsi_above_threshold() {
        let rows = vec![row(0, 10.0, sma(10.0, 10.2, 45.0)), row(5, 10.3, sma(10.3, 10.2, 50.0))];
        assert!(!buy_sma_crossover_rsi(&rows, &params(50.0)));
    }

    #[test]
    fn sma_crossover_buy_needs_a_cross() {
        let rows = vec![row(0, 10.4, sma(10.4, 10.2, 60.0)), row(5, 10.5, sma(10.5, 10.2, 60.0))];
        assert!(!buy_sma_crossover_rsi(&rows, &params(50.0)));
    }

    #[test]
    fn crossover_with_nan_never_fires() {
        let nan = f64::NAN;
        let cases = [
            (sma(nan, 10.2, 45.0), sma(10.3, 10.2, 55.0)),
            (sma(10.0, 10.2, 45.0), sma(10.3, nan, 55.0)),
            (sma(10.0, 10.2, 45.0), sma(10.3, 10.2, nan)),
        ];
        for (prev, curr) in cases {
            let rows = vec![row(0, 10.0, prev), row(5, 10.3, curr)];
            assert!(!buy_sma_crossover_rsi(&rows, &params(50.0)));
        }
    }

    #[test]
    fn single_row_never_crosses() {
        let rows = vec![row(0, 10.3, sma(10.3, 10.2, 55.0))];
        assert!(!buy_sma_crossover_rsi(&rows, &params(50.0)));
        assert!(!buy_ema_crossover_rsi(&[], &params(50.0)));
    }

    #[test]
    fn ema_crossover_buy_reads_ema_columns() {
        let rows = vec![row(0, 10.0, ema(10.0, 10.2, 45.0)), row(5, 10.3, ema(10.3, 10.2, 55.0))];
        assert!(buy_ema_crossover_rsi(&rows, &params(50.0)));
        // SMA columns are undefined in these rows
        assert!(!buy_sma_crossover_rsi(&rows, &params(50.0)));
    }

    #[test]
    fn sma_rsi_threshold_buy() {
        let p = StrategyParams {
            buy_rsi_threshold: 40.0,
            buy_below_moving_average: 0.01,
            ..StrategyParams::default()
        };
        let cheap = vec![row(0, 98.9, sma(100.0, 101.0, 35.0))];
        assert!(buy_sma_rsi_threshold(&cheap, &p));

        let not_cheap = vec![row(0, 99.5, sma(100.0, 101.0, 35.0))];
        assert!(!buy_sma_rsi_threshold(&not_cheap, &p));

        let overbought = vec![row(0, 98.9, sma(100.0, 101.0, 45.0))];
        assert!(!buy_sma_rsi_threshold(&overbought, &p));

        let undefined = vec![row(0, 98.9, sma(f64::NAN, 101.0, 35.0))];
        assert!(!buy_sma_rsi_threshold(&undefined, &p));
    }

    #[test]
    fn above_buy_is_strict() {
        let pos = bought_at(100.0);
        let p = StrategyParams {
            profit_percentage: 0.01,
            ..StrategyParams::default()
        };
        let above = vec![row(5, 101.5, IndicatorColumns::UNDEFINED)];
        assert!(sell_above_buy(&pos, &above, &p));

        let equal = vec![row(5, 101.0, IndicatorColumns::UNDEFINED)];
        assert!(!sell_above_buy(&pos, &equal, &p));
        assert!(!sell_above_buy(&pos, &[], &p));
    }

    #[test]
    fn sma_crossover_sell_requires_profit() {
        let p = StrategyParams::default();
        let rows = vec![row(0, 110.0, sma(10.4, 10.2, 65.0)), row(5, 110.0, sma(10.1, 10.2, 65.0))];
        assert!(sell_sma_crossover_rsi(&bought_at(100.0), &rows, &p));
        assert!(!sell_sma_crossover_rsi(&bought_at(109.5), &rows, &p));
    }

    #[test]
    fn ema_crossover_sell_gated_by_rsi() {
        let p = StrategyParams::default();
        let rows = vec![row(0, 110.0, ema(10.4, 10.2, 75.0)), row(5, 110.0, ema(10.1, 10.2, 75.0))];
        assert!(!sell_ema_crossover_rsi(&bought_at(100.0), &rows, &p));
    }

    #[test]
    fn price_crosses_below_slow_ema() {
        let p = StrategyParams::default();
        let rows = vec![
            row(0, 106.0, ema(f64::NAN, 105.0, 60.0)),
            row(5, 104.5, ema(f64::NAN, 105.0, 60.0)),
        ];
        assert!(sell_price_ema_crossover_rsi(&bought_at(100.0), &rows, &p));
        // minimum profit not met
        assert!(!sell_price_ema_crossover_rsi(&bought_at(104.0), &rows, &p));

        let undefined = vec![
            row(0, 106.0, ema(f64::NAN, f64::NAN, 60.0)),
            row(5, 104.5, ema(f64::NAN, 105.0, 60.0)),
        ];
        assert!(!sell_price_ema_crossover_rsi(&bought_at(100.0), &undefined, &p));
    }

    #[test]
    fn trailing_stop_uses_peak_since_open() {
        let p = StrategyParams {
            profit_percentage: 0.01,
            tsl_percentage: 0.02,
            ..StrategyParams::default()
        };
        let pos = bought_at(100.0);
        let u = IndicatorColumns::UNDEFINED;
        // the 130 reading predates the position and is ignored
        let rows = vec![
            row(-5, 130.0, u),
            row(0, 100.0, u),
            row(5, 110.0, u),
            row(10, 107.5, u),
        ];
        assert!(sell_trailing_stop_loss(&pos, &rows, &p));

        let shallow = vec![row(0, 100.0, u), row(5, 110.0, u), row(10, 108.5, u)];
        assert!(!sell_trailing_stop_loss(&pos, &shallow, &p));
    }

    #[test]
    fn trailing_stop_needs_rows_after_open() {
        let p = StrategyParams::default();
        let rows = vec![row(0, 100.0, IndicatorColumns::UNDEFINED)];
        assert!(!sell_trailing_stop_loss(&bought_at(50.0), &rows, &p));
    }

    #[test]
    fn names_resolve_per_side() {
        assert_eq!("sma_crossover_rsi".parse::<BuyStrategy>().unwrap(), BuyStrategy::SmaCrossoverRsi);
        assert_eq!("ABOVE_BUY".parse::<SellStrategy>().unwrap(), SellStrategy::AboveBuy);

        let err = "above_buy".parse::<BuyStrategy>().unwrap_err();
        assert!(matches!(err, AgentError::UnknownStrategy { ref side, .. } if side == "buy"));

        let err = "sma_rsi_threshold".parse::<SellStrategy>().unwrap_err();
        assert!(matches!(err, AgentError::UnknownStrategy { ref side, .. } if side == "sell"));
    }

    #[test]
    fn evaluator_dispatches_to_configured_predicates() {
        let evaluator =
            StrategyEvaluator::from_names("sma_crossover_rsi", "above_buy", params(50.0)).unwrap();
        let rows = vec![row(0, 10.0, sma(10.0, 10.2, 45.0)), row(5, 10.3, sma(10.3, 10.2, 55.0))];
        assert!(evaluator.should_buy("ETH", &rows));

        let pos = Position::pending_buy("ord-1", "ETH", 1.0, 10.0, t(0));
        assert!(evaluator.should_sell(&pos, &rows));
    }

    #[test]
    fn evaluator_rejects_unknown_names() {
        assert!(StrategyEvaluator::from_names("moon", "above_buy", StrategyParams::default()).is_err());
        assert!(StrategyEvaluator::from_names("sma_crossover_rsi", "hodl", StrategyParams::default()).is_err());
    }
}
