//! In-memory paper trading venue.
//!
//! Limit orders fill immediately at their limit price, so the open-order list
//! is always empty. Quotes sit a fixed spread around the last price seen by
//! the market data source, which is shared through a [`PriceBoard`].

use crate::domain::config::PaperConfig;
use crate::domain::error::AgentError;
use crate::domain::price::{round_to, PriceRow};
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::venue_port::{Increments, OrderSide, Quote, VenuePort};
use chrono::{NaiveDateTime, Utc};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info};

/// Total bid/ask spread as a fraction of the last price.
pub const DEFAULT_SPREAD: f64 = 0.001;

/// Last known price per instrument, shared between a market data source and
/// the paper venue.
#[derive(Debug, Clone, Default)]
pub struct PriceBoard {
    prices: Rc<RefCell<HashMap<String, f64>>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        PriceBoard::default()
    }

    pub fn record(&self, instrument: &str, price: f64) {
        self.prices.borrow_mut().insert(instrument.to_string(), price);
    }

    pub fn get(&self, instrument: &str) -> Option<f64> {
        self.prices.borrow().get(instrument).copied()
    }
}

/// Market data source that posts every price it returns to a [`PriceBoard`].
pub struct RecordingMarketData<M> {
    inner: M,
    board: PriceBoard,
}

impl<M: MarketDataPort> RecordingMarketData<M> {
    pub fn new(inner: M, board: PriceBoard) -> Self {
        RecordingMarketData { inner, board }
    }
}

impl<M: MarketDataPort> MarketDataPort for RecordingMarketData<M> {
    fn get_ohlc_history(
        &mut self,
        instrument: &str,
        interval_minutes: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError> {
        let rows = self.inner.get_ohlc_history(instrument, interval_minutes, now)?;
        if let Some(last) = rows.last() {
            self.board.record(instrument, last.price);
        }
        Ok(rows)
    }

    fn get_latest_price(&mut self, instrument: &str) -> Result<f64, AgentError> {
        let price = self.inner.get_latest_price(instrument)?;
        self.board.record(instrument, price);
        Ok(price)
    }
}

pub struct PaperVenue {
    cash: f64,
    holdings: HashMap<String, f64>,
    increments: Increments,
    spread: f64,
    board: PriceBoard,
    session: String,
    next_order: u64,
}

impl PaperVenue {
    pub fn new(config: &PaperConfig, board: PriceBoard) -> Self {
        PaperVenue {
            cash: config.starting_cash,
            holdings: HashMap::new(),
            increments: Increments {
                quantity: config.quantity_increment,
                price: config.price_increment,
            },
            spread: DEFAULT_SPREAD,
            board,
            session: Utc::now().format("%Y%m%d%H%M%S").to_string(),
            next_order: 1,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Add a holding the venue did not fill itself, e.g. one restored from
    /// the ledger.
    pub fn hold(&mut self, instrument: &str, quantity: f64) {
        *self.holdings.entry(instrument.to_string()).or_insert(0.0) += quantity;
    }

    pub fn holding(&self, instrument: &str) -> f64 {
        self.holdings.get(instrument).copied().unwrap_or(0.0)
    }

    fn order_id(&mut self) -> String {
        // The session stamp keeps ids unique across restarts.
        let id = format!("paper-{}-{}", self.session, self.next_order);
        self.next_order += 1;
        id
    }
}

impl VenuePort for PaperVenue {
    fn get_quote(&mut self, instrument: &str) -> Result<Quote, AgentError> {
        let last = self
            .board
            .get(instrument)
            .ok_or_else(|| AgentError::venue("get_quote", format!("no price for {}", instrument)))?;
        let half = last * self.spread / 2.0;
        Ok(Quote {
            bid: round_to(last - half, 7),
            ask: round_to(last + half, 7),
        })
    }

    fn place_limit_order(
        &mut self,
        instrument: &str,
        quantity: f64,
        price: f64,
        side: OrderSide,
    ) -> Result<String, AgentError> {
        const OP: &str = "place_limit_order";
        if !(quantity.is_finite() && quantity > 0.0 && price.is_finite() && price > 0.0) {
            return Err(AgentError::venue(
                OP,
                format!("invalid order {} @ {}", quantity, price),
            ));
        }
        let notional = quantity * price;
        match side {
            OrderSide::Buy => {
                if notional > self.cash + 1e-9 {
                    return Err(AgentError::venue(
                        OP,
                        format!("insufficient funds: need {:.3}, have {:.3}", notional, self.cash),
                    ));
                }
                self.cash -= notional;
                *self.holdings.entry(instrument.to_string()).or_insert(0.0) += quantity;
            }
            OrderSide::Sell => {
                let held = self.holding(instrument);
                if quantity > held + 1e-9 {
                    return Err(AgentError::venue(
                        OP,
                        format!("insufficient {}: need {}, have {}", instrument, quantity, held),
                    ));
                }
                self.cash += notional;
                self.holdings.insert(instrument.to_string(), (held - quantity).max(0.0));
            }
        }
        let id = self.order_id();
        info!(order = %id, instrument, %side, quantity, price, cash = self.cash, "paper fill");
        Ok(id)
    }

    fn cancel_order(&mut self, order_id: &str) -> Result<(), AgentError> {
        // Orders fill on submission; there is never anything left to cancel.
        debug!(order = order_id, "paper cancel is a no-op");
        Ok(())
    }

    fn list_open_orders(&mut self) -> Result<Vec<String>, AgentError> {
        Ok(Vec::new())
    }

    fn get_buying_power(&mut self) -> Result<f64, AgentError> {
        Ok(round_to(self.cash, 3))
    }

    fn get_increments(&mut self, _instrument: &str) -> Result<Increments, AgentError> {
        Ok(self.increments)
    }
}
