//! One trading cycle: data, reconciliation, sells, buys.
//!
//! The orchestrator owns the series, the ledger, the circuit breaker and the
//! available-cash figure. Every external call goes through the breaker; a
//! failed call is logged and skipped, and the cycle carries on.

use crate::domain::circuit_breaker::CircuitBreaker;
use crate::domain::config::AgentConfig;
use crate::domain::error::AgentError;
use crate::domain::execution::{available_cash, estimate_profit, plan_buy, plan_sell, trade_amount};
use crate::domain::indicator::{ComputeMode, IndicatorEngine};
use crate::domain::ledger::{PositionLedger, ReconcileReport};
use crate::domain::position::{Position, PositionState};
use crate::domain::price::PriceRow;
use crate::domain::series::{IngestOutcome, RejectReason, TimeSeriesStore};
use crate::domain::strategy::StrategyEvaluator;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::venue_port::{Increments, OrderSide, VenuePort};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Why a sell was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    Strategy,
    StopLoss,
}

/// An order the cycle submitted, or would have submitted in a dry run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    /// Venue order id; `None` in a dry run.
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub started_at: NaiveDateTime,
    pub trading_locked: bool,
    pub reloaded: Vec<String>,
    pub rejections: Vec<(String, RejectReason)>,
    pub reconcile: ReconcileReport,
    pub buys: Vec<OrderIntent>,
    pub sells: Vec<OrderIntent>,
    pub evicted: usize,
}

impl CycleReport {
    fn new(started_at: NaiveDateTime) -> Self {
        CycleReport {
            started_at,
            trading_locked: false,
            reloaded: Vec::new(),
            rejections: Vec::new(),
            reconcile: ReconcileReport::default(),
            buys: Vec::new(),
            sells: Vec::new(),
            evicted: 0,
        }
    }
}

pub struct TradingCycleOrchestrator {
    config: AgentConfig,
    engine: IndicatorEngine,
    evaluator: StrategyEvaluator,
    series: TimeSeriesStore,
    ledger: PositionLedger,
    breaker: CircuitBreaker,
    cash: f64,
    increments: BTreeMap<String, Increments>,
    venue: Box<dyn VenuePort>,
    market_data: Box<dyn MarketDataPort>,
}

impl TradingCycleOrchestrator {
    /// Restore persisted state and prepare for the first cycle.
    ///
    /// Fetching venue increments is the one external call whose failure is
    /// fatal here.
    pub fn start(
        config: AgentConfig,
        mut venue: Box<dyn VenuePort>,
        market_data: Box<dyn MarketDataPort>,
        positions: Vec<Position>,
        saved_rows: Vec<PriceRow>,
    ) -> Result<Self, AgentError> {
        let engine = IndicatorEngine::new(config.windows);
        let evaluator = StrategyEvaluator::new(
            config.strategy.buy,
            config.strategy.sell,
            config.strategy.params.clone(),
        );
        let ledger = PositionLedger::from_positions(positions)?;

        let mut series = TimeSeriesStore::new(config.series_config(), &config.instruments);
        let mut by_instrument: BTreeMap<String, Vec<PriceRow>> = BTreeMap::new();
        for row in saved_rows {
            if config.instruments.contains(&row.instrument) {
                by_instrument.entry(row.instrument.clone()).or_default().push(row);
            }
        }
        for (instrument, mut rows) in by_instrument {
            rows.sort_by_key(|r| r.timestamp);
            let kept = series.reload(&instrument, rows);
            series.recompute(&instrument, &engine, ComputeMode::Live);
            debug!(instrument = %instrument, rows = kept, "restored series");
        }

        let mut increments = BTreeMap::new();
        for instrument in &config.instruments {
            let inc = venue.get_increments(instrument)?;
            debug!(instrument = %instrument, quantity = inc.quantity, price = inc.price, "venue increments");
            increments.insert(instrument.clone(), inc);
        }

        let mut orchestrator = TradingCycleOrchestrator {
            breaker: CircuitBreaker::new(config.max_consecutive_failures),
            config,
            engine,
            evaluator,
            series,
            ledger,
            cash: 0.0,
            increments,
            venue,
            market_data,
        };
        orchestrator.refresh_cash();
        info!(
            instruments = ?orchestrator.config.instruments,
            positions = orchestrator.ledger.len(),
            cash = orchestrator.cash,
            buy = %orchestrator.evaluator.buy_strategy(),
            sell = %orchestrator.evaluator.sell_strategy(),
            dry_run = !orchestrator.config.trades_enabled,
            "agent started"
        );
        Ok(orchestrator)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn series(&self) -> &TimeSeriesStore {
        &self.series
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions_snapshot(&self) -> Vec<Position> {
        self.ledger.snapshot()
    }

    pub fn series_snapshot(&self) -> Vec<PriceRow> {
        self.series.all_rows().cloned().collect()
    }

    /// Run one full cycle at `now`.
    ///
    /// Refuses with [`AgentError::CircuitBreakerTripped`] once the breaker
    /// has reached its threshold. Individual external failures never make
    /// this return an error.
    pub fn run_cycle(&mut self, now: NaiveDateTime) -> Result<CycleReport, AgentError> {
        if self.breaker.is_tripped() {
            return Err(AgentError::CircuitBreakerTripped {
                failures: self.breaker.failures(),
            });
        }

        let mut report = CycleReport::new(now);
        report.trading_locked = !self.refresh_data(now, &mut report);
        if report.trading_locked {
            warn!("trading locked for this cycle");
        }

        report.reconcile = self.ledger.reconcile_pending(
            now,
            self.venue.as_mut(),
            &mut self.breaker,
            self.config.cancel_after(),
        )?;
        if report.reconcile.changed() {
            info!(
                confirmed_buys = report.reconcile.confirmed_buys.len(),
                confirmed_sells = report.reconcile.confirmed_sells.len(),
                cancelled = report.reconcile.cancelled.len(),
                "positions reconciled"
            );
        }
        if report.reconcile.sells_confirmed() {
            self.refresh_cash();
        }

        if !report.trading_locked {
            self.evaluate_sells(now, &mut report)?;
            self.evaluate_buys(now, &mut report);
        }

        report.evicted = self.series.evict_to(self.config.max_rows);
        self.log_status(&report);
        Ok(report)
    }

    /// Bring every instrument's series up to date. Returns false when any
    /// instrument could not be trusted this cycle.
    fn refresh_data(&mut self, now: NaiveDateTime, report: &mut CycleReport) -> bool {
        let mut all_ok = true;
        let instruments = self.config.instruments.clone();
        for instrument in &instruments {
            if self.series.instrument_has_gap(instrument, now) {
                warn!(instrument = %instrument, "gap in price series, reloading history");
                let history = self.breaker.observe(
                    self.market_data
                        .get_ohlc_history(instrument, self.config.interval_minutes, now),
                );
                match history {
                    Ok(rows) => {
                        let kept = self.series.reload(instrument, rows);
                        self.series.recompute(instrument, &self.engine, ComputeMode::Backfill);
                        info!(instrument = %instrument, rows = kept, "history reloaded");
                        report.reloaded.push(instrument.clone());
                    }
                    Err(e) => {
                        error!(instrument = %instrument, operation = "get_ohlc_history", error = %e, "history reload failed");
                        all_ok = false;
                        continue;
                    }
                }
            }

            match self.breaker.observe(self.market_data.get_latest_price(instrument)) {
                Ok(price) => match self.series.ingest(instrument, price, now) {
                    Ok(IngestOutcome::Accepted) => {
                        self.series.recompute(instrument, &self.engine, ComputeMode::Live);
                    }
                    Ok(IngestOutcome::Rejected(reason)) => {
                        warn!(instrument = %instrument, price, reason = %reason, "price rejected");
                        report.rejections.push((instrument.clone(), reason));
                        all_ok = false;
                    }
                    Err(e) => {
                        warn!(instrument = %instrument, error = %e, "price rejected");
                        all_ok = false;
                    }
                },
                Err(e) => {
                    error!(instrument = %instrument, operation = "get_latest_price", error = %e, "could not fetch price");
                    all_ok = false;
                }
            }

            if self.series.instrument_has_gap(instrument, now) {
                warn!(instrument = %instrument, "price series still has a gap");
                all_ok = false;
            }
        }
        all_ok
    }

    fn evaluate_sells(&mut self, now: NaiveDateTime, report: &mut CycleReport) -> Result<(), AgentError> {
        let bought: Vec<Position> = self
            .ledger
            .in_state(PositionState::Bought)
            .into_iter()
            .cloned()
            .collect();
        for position in bought {
            let rows = self.series.rows(&position.instrument);
            let Some(price) = rows.last().map(|r| r.price) else {
                continue;
            };
            let reason = if position.should_stop_loss(price, self.config.trading.stop_loss_threshold) {
                SellReason::StopLoss
            } else if self.evaluator.should_sell(&position, rows) {
                SellReason::Strategy
            } else {
                continue;
            };
            self.sell(&position, reason, now, report)?;
        }
        Ok(())
    }

    fn sell(
        &mut self,
        position: &Position,
        reason: SellReason,
        now: NaiveDateTime,
        report: &mut CycleReport,
    ) -> Result<(), AgentError> {
        let instrument = position.instrument.as_str();
        let Some(bid) = self.quote_price(instrument, OrderSide::Sell) else {
            return Ok(());
        };
        let plan = plan_sell(position, bid, &self.increments_for(instrument));
        let profit = estimate_profit(position, plan.price);

        if !self.config.trades_enabled {
            info!(
                position = %position.id,
                instrument,
                quantity = plan.quantity,
                price = plan.price,
                profit,
                ?reason,
                "would have sold"
            );
            report.sells.push(OrderIntent {
                instrument: instrument.to_string(),
                side: OrderSide::Sell,
                quantity: plan.quantity,
                price: plan.price,
                order_id: None,
            });
            return Ok(());
        }

        let placed = self.breaker.observe(self.venue.place_limit_order(
            instrument,
            plan.quantity,
            plan.price,
            OrderSide::Sell,
        ));
        match placed {
            Ok(order_id) => {
                if let Err(e) = self
                    .ledger
                    .mark_sell_submitted(&position.id, &order_id, profit, now)
                {
                    error!(position = %position.id, order = %order_id, error = %e, "could not record sell order");
                    return Ok(());
                }
                info!(
                    position = %position.id,
                    order = %order_id,
                    instrument,
                    quantity = plan.quantity,
                    price = plan.price,
                    profit,
                    ?reason,
                    "sell order submitted"
                );
                report.sells.push(OrderIntent {
                    instrument: instrument.to_string(),
                    side: OrderSide::Sell,
                    quantity: plan.quantity,
                    price: plan.price,
                    order_id: Some(order_id),
                });
            }
            Err(e) => {
                error!(position = %position.id, operation = "place_limit_order", error = %e, "sell order failed");
            }
        }
        Ok(())
    }

    fn evaluate_buys(&mut self, now: NaiveDateTime, report: &mut CycleReport) {
        let instruments = self.config.instruments.clone();
        for instrument in &instruments {
            let Some(amount) = trade_amount(self.cash, &self.config.trading) else {
                debug!(cash = self.cash, min_trade = self.config.trading.min_trade, "not enough cash to buy");
                return;
            };
            if !self.evaluator.should_buy(instrument, self.series.rows(instrument)) {
                continue;
            }
            if self.buy(instrument, amount, now, report) {
                self.refresh_cash();
            }
        }
    }

    /// Submit a buy. Returns true when an order was placed.
    fn buy(&mut self, instrument: &str, amount: f64, now: NaiveDateTime, report: &mut CycleReport) -> bool {
        let Some(ask) = self.quote_price(instrument, OrderSide::Buy) else {
            return false;
        };
        let Some(plan) = plan_buy(amount, ask, &self.increments_for(instrument)) else {
            warn!(instrument, amount, ask, "order size rounds to zero, skipping buy");
            return false;
        };

        if !self.config.trades_enabled {
            info!(instrument, quantity = plan.quantity, price = plan.price, amount, "would have bought");
            report.buys.push(OrderIntent {
                instrument: instrument.to_string(),
                side: OrderSide::Buy,
                quantity: plan.quantity,
                price: plan.price,
                order_id: None,
            });
            return false;
        }

        let placed = self.breaker.observe(self.venue.place_limit_order(
            instrument,
            plan.quantity,
            plan.price,
            OrderSide::Buy,
        ));
        match placed {
            Ok(order_id) => {
                let position = Position::pending_buy(&order_id, instrument, plan.quantity, plan.price, now);
                if let Err(e) = self.ledger.open(position) {
                    error!(order = %order_id, error = %e, "could not record buy order");
                    return false;
                }
                info!(order = %order_id, instrument, quantity = plan.quantity, price = plan.price, "buy order submitted");
                report.buys.push(OrderIntent {
                    instrument: instrument.to_string(),
                    side: OrderSide::Buy,
                    quantity: plan.quantity,
                    price: plan.price,
                    order_id: Some(order_id),
                });
                true
            }
            Err(e) => {
                error!(instrument, operation = "place_limit_order", error = %e, "buy order failed");
                false
            }
        }
    }

    /// Ask (buy) or bid (sell) price, falling back to the last series price
    /// when the quote call fails.
    fn quote_price(&mut self, instrument: &str, side: OrderSide) -> Option<f64> {
        let quoted = match self.breaker.observe(self.venue.get_quote(instrument)) {
            Ok(quote) => match side {
                OrderSide::Buy => Some(quote.ask),
                OrderSide::Sell => Some(quote.bid),
            },
            Err(e) => {
                warn!(instrument, operation = "get_quote", error = %e, "quote failed, using last price");
                None
            }
        };
        let price = quoted.or_else(|| self.series.last_price(instrument));
        match price {
            Some(p) if p.is_finite() && p > 0.0 => Some(p),
            _ => {
                warn!(instrument, %side, "no usable price");
                None
            }
        }
    }

    fn increments_for(&self, instrument: &str) -> Increments {
        self.increments.get(instrument).copied().unwrap_or(Increments {
            quantity: 0.0,
            price: 0.0,
        })
    }

    fn refresh_cash(&mut self) {
        match self.breaker.observe(self.venue.get_buying_power()) {
            Ok(buying_power) => {
                self.cash = available_cash(buying_power, self.config.trading.reserve);
                debug!(buying_power, cash = self.cash, "cash refreshed");
            }
            Err(e) => {
                error!(operation = "get_buying_power", error = %e, "could not refresh cash");
            }
        }
    }

    fn log_status(&self, report: &CycleReport) {
        for position in self.ledger.live() {
            let last = self.series.last_price(&position.instrument);
            let value = last
                .map(|p| format!("{:.3}", position.market_value(p)))
                .unwrap_or_else(|| "N/A".to_string());
            let pnl = last
                .map(|p| format!("{:.3}", position.unrealized_pnl(p)))
                .unwrap_or_else(|| "N/A".to_string());
            info!(
                position = %position.id,
                instrument = %position.instrument,
                state = %position.state,
                quantity = position.quantity,
                price = position.entry_price,
                cost = %format!("{:.3}", position.cost()),
                value = %value,
                pnl = %pnl,
                "position"
            );
        }
        info!(
            cash = self.cash,
            locked = report.trading_locked,
            buys = report.buys.len(),
            sells = report.sells.len(),
            failures = self.breaker.failures(),
            "cycle complete"
        );
    }
}
