//! Position lifecycle.
//!
//! A position is created in `PendingBuy` when a buy order is accepted by the
//! venue and moves through the states below. Every state change goes through
//! [`PositionState::can_transition_to`].
//!
//! ```text
//! PendingBuy  -> Bought | CancelPendingBuy
//! CancelPendingBuy -> PendingBuy | Bought | Cancelled
//! Bought      -> PendingSell
//! PendingSell -> Sold | CancelPendingSell
//! CancelPendingSell -> PendingSell | Sold | Cancelled
//! ```

use crate::domain::error::AgentError;
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionState {
    PendingBuy,
    Bought,
    PendingSell,
    Sold,
    CancelPendingBuy,
    CancelPendingSell,
    Cancelled,
}

impl PositionState {
    pub const ALL: [PositionState; 7] = [
        PositionState::PendingBuy,
        PositionState::Bought,
        PositionState::PendingSell,
        PositionState::Sold,
        PositionState::CancelPendingBuy,
        PositionState::CancelPendingSell,
        PositionState::Cancelled,
    ];

    pub fn can_transition_to(self, next: PositionState) -> bool {
        use PositionState::*;
        matches!(
            (self, next),
            (PendingBuy, Bought)
                | (PendingBuy, CancelPendingBuy)
                | (CancelPendingBuy, PendingBuy)
                | (CancelPendingBuy, Bought)
                | (CancelPendingBuy, Cancelled)
                | (Bought, PendingSell)
                | (PendingSell, Sold)
                | (PendingSell, CancelPendingSell)
                | (CancelPendingSell, PendingSell)
                | (CancelPendingSell, Sold)
                | (CancelPendingSell, Cancelled)
        )
    }

    pub fn is_live(self) -> bool {
        matches!(
            self,
            PositionState::PendingBuy | PositionState::Bought | PositionState::PendingSell
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PositionState::Sold | PositionState::Cancelled)
    }

    pub fn is_pending(self) -> bool {
        matches!(self, PositionState::PendingBuy | PositionState::PendingSell)
    }

    /// State reached when a pending order is confirmed.
    pub fn confirmed(self) -> Option<PositionState> {
        match self {
            PositionState::PendingBuy | PositionState::CancelPendingBuy => {
                Some(PositionState::Bought)
            }
            PositionState::PendingSell | PositionState::CancelPendingSell => {
                Some(PositionState::Sold)
            }
            _ => None,
        }
    }

    /// State used while a pending order is suspected of needing cancellation.
    pub fn cancel_pending(self) -> Option<PositionState> {
        match self {
            PositionState::PendingBuy => Some(PositionState::CancelPendingBuy),
            PositionState::PendingSell => Some(PositionState::CancelPendingSell),
            _ => None,
        }
    }

    /// Pending state a cancel-pending position falls back to.
    pub fn pending(self) -> Option<PositionState> {
        match self {
            PositionState::CancelPendingBuy => Some(PositionState::PendingBuy),
            PositionState::CancelPendingSell => Some(PositionState::PendingSell),
            _ => None,
        }
    }

    /// Short code used in persisted state.
    pub fn code(self) -> &'static str {
        match self {
            PositionState::PendingBuy => "PB",
            PositionState::Bought => "B",
            PositionState::PendingSell => "PS",
            PositionState::Sold => "S",
            PositionState::CancelPendingBuy => "CPB",
            PositionState::CancelPendingSell => "CPS",
            PositionState::Cancelled => "C",
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionState::PendingBuy => "PendingBuy",
            PositionState::Bought => "Bought",
            PositionState::PendingSell => "PendingSell",
            PositionState::Sold => "Sold",
            PositionState::CancelPendingBuy => "CancelPendingBuy",
            PositionState::CancelPendingSell => "CancelPendingSell",
            PositionState::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

impl FromStr for PositionState {
    type Err = String;

    /// Accepts both the short code and the full name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        PositionState::ALL
            .into_iter()
            .find(|state| {
                state.code().eq_ignore_ascii_case(wanted)
                    || state.to_string().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown position state '{}'", wanted))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Ledger key: the venue id of the entry order, or a `local-<n>` placeholder.
    pub id: String,
    pub instrument: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_order_id: Option<String>,
    pub state: PositionState,
    pub profit: f64,
    pub opened_at: NaiveDateTime,
    /// When the order currently awaiting confirmation was submitted.
    pub submitted_at: NaiveDateTime,
}

impl Position {
    pub fn pending_buy(
        id: &str,
        instrument: &str,
        quantity: f64,
        entry_price: f64,
        opened_at: NaiveDateTime,
    ) -> Self {
        Position {
            id: id.to_string(),
            instrument: instrument.to_string(),
            quantity,
            entry_price,
            exit_order_id: None,
            state: PositionState::PendingBuy,
            profit: 0.0,
            opened_at,
            submitted_at: opened_at,
        }
    }

    /// Venue id of the order this position is currently waiting on.
    pub fn active_order_id(&self) -> &str {
        match self.state {
            PositionState::PendingSell | PositionState::CancelPendingSell => {
                self.exit_order_id.as_deref().unwrap_or(&self.id)
            }
            _ => &self.id,
        }
    }

    pub fn cost(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.entry_price)
    }

    /// Price at which the configured minimum profit is reached.
    pub fn profit_target(&self, profit_percentage: f64) -> f64 {
        self.entry_price + self.entry_price * profit_percentage
    }

    pub fn should_stop_loss(&self, price: f64, stop_loss_threshold: f64) -> bool {
        if price.is_nan() {
            return false;
        }
        price < self.entry_price - self.entry_price * stop_loss_threshold
    }

    pub fn transition(&mut self, next: PositionState) -> Result<PositionState, AgentError> {
        if !self.state.can_transition_to(next) {
            return Err(AgentError::IllegalTransition {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }
}
