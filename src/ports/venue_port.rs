//! Execution venue port trait.

use crate::domain::error::AgentError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Smallest quantity and price steps the venue accepts for an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Increments {
    pub quantity: f64,
    pub price: f64,
}

/// Port for the brokerage or exchange that executes orders.
///
/// Calls are blocking; an implementation maps its own timeouts to `Err`.
pub trait VenuePort {
    fn get_quote(&mut self, instrument: &str) -> Result<Quote, AgentError>;

    fn place_limit_order(
        &mut self,
        instrument: &str,
        quantity: f64,
        price: f64,
        side: OrderSide,
    ) -> Result<String, AgentError>;

    fn cancel_order(&mut self, order_id: &str) -> Result<(), AgentError>;

    fn list_open_orders(&mut self) -> Result<Vec<String>, AgentError>;

    fn get_buying_power(&mut self) -> Result<f64, AgentError>;

    fn get_increments(&mut self, instrument: &str) -> Result<Increments, AgentError>;
}
