//! Order sizing and pricing.
//!
//! Pure helpers used by the orchestrator when it turns a signal into a limit
//! order: trade amount from available cash, flooring to venue increments and
//! the profit estimate recorded on sell submission.

use crate::domain::config::TradingConfig;
use crate::domain::position::Position;
use crate::domain::price::round_to;
use crate::ports::venue_port::Increments;

/// Decimal places every submitted price and quantity is rounded to.
pub const ORDER_DECIMALS: i32 = 7;

/// A sized limit order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderPlan {
    pub quantity: f64,
    pub price: f64,
}

impl OrderPlan {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Floor `value` to a multiple of `increment`. A non-positive increment only
/// rounds.
pub fn floor_to_increment(value: f64, increment: f64) -> f64 {
    if increment <= 0.0 || !increment.is_finite() {
        return round_to(value, ORDER_DECIMALS);
    }
    // round first so 0.3 / 0.1 does not floor to 2
    let steps = round_to(value / increment, ORDER_DECIMALS).floor();
    round_to(steps * increment, ORDER_DECIMALS)
}

/// Cash left for trading once the reserve is set aside.
pub fn available_cash(buying_power: f64, reserve: f64) -> f64 {
    round_to(buying_power - reserve, 3).max(0.0)
}

/// Amount to commit to one buy, or `None` when cash is below the minimum
/// trade size.
pub fn trade_amount(cash: f64, trading: &TradingConfig) -> Option<f64> {
    if cash <= 0.0 || cash < trading.min_trade {
        return None;
    }
    if trading.max_trade <= 0.0 {
        Some(cash)
    } else {
        Some(trading.max_trade.min(cash))
    }
}

/// Size a buy of `amount` at `ask`. `None` when the floored quantity is zero.
pub fn plan_buy(amount: f64, ask: f64, increments: &Increments) -> Option<OrderPlan> {
    let price = floor_to_increment(ask, increments.price);
    if price <= 0.0 || !price.is_finite() {
        return None;
    }
    let quantity = floor_to_increment(amount / price, increments.quantity);
    if quantity <= 0.0 {
        return None;
    }
    Some(OrderPlan { quantity, price })
}

pub fn plan_sell(position: &Position, bid: f64, increments: &Increments) -> OrderPlan {
    OrderPlan {
        quantity: floor_to_increment(position.quantity, increments.quantity),
        price: floor_to_increment(bid, increments.price),
    }
}

pub fn estimate_profit(position: &Position, sell_price: f64) -> f64 {
    round_to(
        position.quantity * sell_price - position.quantity * position.entry_price,
        3,
    )
}
