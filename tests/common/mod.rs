#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use polltrader::adapters::file_config_adapter::FileConfigAdapter;
use polltrader::domain::config::AgentConfig;
use polltrader::domain::config_validation::load_agent_config;
use polltrader::domain::error::AgentError;
use polltrader::domain::position::Position;
use polltrader::domain::price::PriceRow;
use polltrader::domain::runner::Clock;
use polltrader::ports::market_data_port::MarketDataPort;
use polltrader::ports::persistence_port::PersistencePort;
use polltrader::ports::venue_port::{Increments, OrderSide, Quote, VenuePort};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Small indicator windows so a dozen rows are enough history.
pub const TEST_INI: &str = r#"
[agent]
instruments = ETH
interval_minutes = 5
cancel_after_minutes = 20
max_rows = 50
trades_enabled = true

[indicators]
sma_fast = 2
sma_slow = 4
ema_fast = 2
ema_slow = 4
macd_fast = 2
macd_slow = 4
macd_signal = 2
rsi_period = 3

[strategy]
buy = sma_rsi_threshold
sell = above_buy

[trading]
min_trade = 1.0
"#;

pub fn test_config() -> AgentConfig {
    config_from(TEST_INI)
}

pub fn config_from(ini: &str) -> AgentConfig {
    let adapter = FileConfigAdapter::from_string(ini).unwrap();
    load_agent_config(&adapter).unwrap()
}

pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

/// Rows for `prices`, `interval` minutes apart, the last one `interval`
/// minutes before `now`.
pub fn history(instrument: &str, prices: &[f64], now: NaiveDateTime, interval: i64) -> Vec<PriceRow> {
    let n = prices.len() as i64;
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| PriceRow::new(instrument, now - minutes((n - i as i64) * interval), p))
        .collect()
}

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub id: String,
    pub instrument: String,
    pub quantity: f64,
    pub price: f64,
    pub side: OrderSide,
}

#[derive(Debug)]
pub struct VenueState {
    pub quotes: HashMap<String, Quote>,
    pub open_orders: Vec<String>,
    pub buying_power: f64,
    pub increments: Increments,
    pub fail_all: bool,
    pub placed: Vec<PlacedOrder>,
    pub cancelled: Vec<String>,
    pub calls: usize,
    next_id: u32,
}

/// Scriptable venue. Clones share state, so a test keeps one handle while
/// the orchestrator owns another.
#[derive(Debug, Clone)]
pub struct MockVenue {
    pub state: Rc<RefCell<VenueState>>,
}

impl MockVenue {
    pub fn new() -> Self {
        MockVenue {
            state: Rc::new(RefCell::new(VenueState {
                quotes: HashMap::new(),
                open_orders: Vec::new(),
                buying_power: 1000.0,
                increments: Increments {
                    quantity: 0.001,
                    price: 0.01,
                },
                fail_all: false,
                placed: Vec::new(),
                cancelled: Vec::new(),
                calls: 0,
                next_id: 1,
            })),
        }
    }

    pub fn set_quote(&self, instrument: &str, bid: f64, ask: f64) {
        self.state
            .borrow_mut()
            .quotes
            .insert(instrument.to_string(), Quote { bid, ask });
    }

    pub fn set_open_orders(&self, ids: &[&str]) {
        self.state.borrow_mut().open_orders = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().fail_all = failing;
    }

    pub fn placed(&self) -> Vec<PlacedOrder> {
        self.state.borrow().placed.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.borrow().cancelled.clone()
    }

    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    fn enter(&self, operation: &str) -> Result<(), AgentError> {
        let mut s = self.state.borrow_mut();
        s.calls += 1;
        if s.fail_all {
            return Err(AgentError::venue(operation, "simulated outage"));
        }
        Ok(())
    }
}

impl VenuePort for MockVenue {
    fn get_quote(&mut self, instrument: &str) -> Result<Quote, AgentError> {
        self.enter("get_quote")?;
        self.state
            .borrow()
            .quotes
            .get(instrument)
            .copied()
            .ok_or_else(|| AgentError::venue("get_quote", "no quote"))
    }

    fn place_limit_order(
        &mut self,
        instrument: &str,
        quantity: f64,
        price: f64,
        side: OrderSide,
    ) -> Result<String, AgentError> {
        self.enter("place_limit_order")?;
        let mut s = self.state.borrow_mut();
        let id = format!("ord-{}", s.next_id);
        s.next_id += 1;
        s.placed.push(PlacedOrder {
            id: id.clone(),
            instrument: instrument.to_string(),
            quantity,
            price,
            side,
        });
        Ok(id)
    }

    fn cancel_order(&mut self, order_id: &str) -> Result<(), AgentError> {
        self.enter("cancel_order")?;
        self.state.borrow_mut().cancelled.push(order_id.to_string());
        Ok(())
    }

    fn list_open_orders(&mut self) -> Result<Vec<String>, AgentError> {
        self.enter("list_open_orders")?;
        Ok(self.state.borrow().open_orders.clone())
    }

    fn get_buying_power(&mut self) -> Result<f64, AgentError> {
        self.enter("get_buying_power")?;
        Ok(self.state.borrow().buying_power)
    }

    fn get_increments(&mut self, _instrument: &str) -> Result<Increments, AgentError> {
        self.enter("get_increments")?;
        Ok(self.state.borrow().increments)
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MarketState {
    pub scripted: HashMap<String, VecDeque<f64>>,
    pub last: HashMap<String, f64>,
    pub history: HashMap<String, Vec<PriceRow>>,
    pub fail_all: bool,
    pub latest_calls: usize,
    pub history_calls: usize,
}

/// Market data that replays scripted prices. Once a script runs out the
/// price keeps rising by 0.1% per call.
#[derive(Debug, Clone, Default)]
pub struct MockMarketData {
    pub state: Rc<RefCell<MarketState>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        MockMarketData::default()
    }

    pub fn script(&self, instrument: &str, prices: &[f64]) {
        self.state
            .borrow_mut()
            .scripted
            .insert(instrument.to_string(), prices.iter().copied().collect());
    }

    pub fn set_history(&self, instrument: &str, rows: Vec<PriceRow>) {
        self.state
            .borrow_mut()
            .history
            .insert(instrument.to_string(), rows);
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().fail_all = failing;
    }

    pub fn latest_calls(&self) -> usize {
        self.state.borrow().latest_calls
    }

    pub fn history_calls(&self) -> usize {
        self.state.borrow().history_calls
    }
}

impl MarketDataPort for MockMarketData {
    fn get_ohlc_history(
        &mut self,
        instrument: &str,
        _interval_minutes: i64,
        _now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError> {
        let mut s = self.state.borrow_mut();
        s.history_calls += 1;
        if s.fail_all {
            return Err(AgentError::market_data("get_ohlc_history", "simulated outage"));
        }
        Ok(s.history.get(instrument).cloned().unwrap_or_default())
    }

    fn get_latest_price(&mut self, instrument: &str) -> Result<f64, AgentError> {
        let mut s = self.state.borrow_mut();
        s.latest_calls += 1;
        if s.fail_all {
            return Err(AgentError::market_data("get_latest_price", "simulated outage"));
        }
        let scripted = s.scripted.get_mut(instrument).and_then(|q| q.pop_front());
        let next = match scripted {
            Some(p) => p,
            None => {
                let last = s.last.get(instrument).copied().unwrap_or(100.0);
                (last * 1.001 * 1000.0).round() / 1000.0
            }
        };
        s.last.insert(instrument.to_string(), next);
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StoreState {
    pub positions: Vec<Position>,
    pub rows: Vec<PriceRow>,
    pub position_saves: usize,
    pub series_saves: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: Rc<RefCell<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_rows(rows: Vec<PriceRow>) -> Self {
        let store = MemoryStore::new();
        store.state.borrow_mut().rows = rows;
        store
    }

    pub fn position_saves(&self) -> usize {
        self.state.borrow().position_saves
    }

    pub fn series_saves(&self) -> usize {
        self.state.borrow().series_saves
    }
}

impl PersistencePort for MemoryStore {
    fn load_positions(&self) -> Result<Vec<Position>, AgentError> {
        Ok(self.state.borrow().positions.clone())
    }

    fn save_positions(&self, positions: &[Position]) -> Result<(), AgentError> {
        let mut s = self.state.borrow_mut();
        s.positions = positions.to_vec();
        s.position_saves += 1;
        Ok(())
    }

    fn load_series(&self) -> Result<Vec<PriceRow>, AgentError> {
        Ok(self.state.borrow().rows.clone())
    }

    fn save_series(&self, rows: &[PriceRow]) -> Result<(), AgentError> {
        let mut s = self.state.borrow_mut();
        s.rows = rows.to_vec();
        s.series_saves += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Clock that moves forward by `step` on every wait and never blocks. With
/// `stopping_after(n)` the n-th wait reports a shutdown.
pub struct ManualClock {
    now: Cell<NaiveDateTime>,
    step: Duration,
    waits: Cell<usize>,
    stop_after: Option<usize>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime, step: Duration) -> Self {
        ManualClock {
            now: Cell::new(start),
            step,
            waits: Cell::new(0),
            stop_after: None,
        }
    }

    pub fn stopping_after(mut self, waits: usize) -> Self {
        self.stop_after = Some(waits);
        self
    }

    pub fn waits(&self) -> usize {
        self.waits.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }

    fn wait(&self, _duration: std::time::Duration) -> bool {
        self.now.set(self.now.get() + self.step);
        self.waits.set(self.waits.get() + 1);
        self.stop_after.is_none_or(|n| self.waits.get() < n)
    }
}
