//! Position ledger and reconciliation against the venue's open orders.
//!
//! The ledger exclusively owns every [`Position`]. Positions are keyed by
//! their entry order id; an order id (entry or exit) maps to at most one
//! position. Terminal positions stay in the ledger as history until pruned.

use crate::domain::circuit_breaker::CircuitBreaker;
use crate::domain::error::AgentError;
use crate::domain::position::{Position, PositionState};
use crate::domain::price::round_to;
use crate::ports::venue_port::VenuePort;
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, HashSet};
use tracing::{error, info, warn};

/// Prefix of ids given to positions recorded by hand.
pub const PLACEHOLDER_PREFIX: &str = "local-";

/// What one reconciliation pass did, by position id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub still_open: Vec<String>,
    pub confirmed_buys: Vec<String>,
    pub confirmed_sells: Vec<String>,
    pub cancelled: Vec<String>,
    pub cancel_failures: Vec<String>,
    /// The open-order list could not be fetched; nothing changed.
    pub open_orders_unavailable: bool,
}

impl ReconcileReport {
    pub fn sells_confirmed(&self) -> bool {
        !self.confirmed_sells.is_empty()
    }

    pub fn changed(&self) -> bool {
        !(self.confirmed_buys.is_empty()
            && self.confirmed_sells.is_empty()
            && self.cancelled.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        PositionLedger::default()
    }

    /// Rebuild a ledger from persisted positions, enforcing id uniqueness.
    pub fn from_positions(positions: Vec<Position>) -> Result<Self, AgentError> {
        let mut ledger = PositionLedger::new();
        for position in positions {
            ledger.open(position)?;
        }
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Positions ordered by opening time, then id.
    pub fn positions(&self) -> Vec<&Position> {
        let mut all: Vec<&Position> = self.positions.values().collect();
        all.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn in_state(&self, state: PositionState) -> Vec<&Position> {
        self.positions()
            .into_iter()
            .filter(|p| p.state == state)
            .collect()
    }

    pub fn live(&self) -> Vec<&Position> {
        self.positions()
            .into_iter()
            .filter(|p| p.state.is_live())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.positions().into_iter().cloned().collect()
    }

    /// True when `order_id` is the entry or exit order of any position.
    pub fn contains_order_id(&self, order_id: &str) -> bool {
        self.positions.contains_key(order_id)
            || self
                .positions
                .values()
                .any(|p| p.exit_order_id.as_deref() == Some(order_id))
    }

    pub fn open(&mut self, position: Position) -> Result<(), AgentError> {
        if self.contains_order_id(&position.id) {
            return Err(AgentError::DuplicateOrderId { id: position.id });
        }
        if let Some(exit) = &position.exit_order_id {
            if exit == &position.id || self.contains_order_id(exit) {
                return Err(AgentError::DuplicateOrderId { id: exit.clone() });
            }
        }
        self.positions.insert(position.id.clone(), position);
        Ok(())
    }

    pub fn transition(&mut self, id: &str, next: PositionState) -> Result<PositionState, AgentError> {
        self.position_mut(id)?.transition(next)
    }

    /// Record an accepted sell order for a `Bought` position.
    pub fn mark_sell_submitted(
        &mut self,
        id: &str,
        exit_order_id: &str,
        estimated_profit: f64,
        now: NaiveDateTime,
    ) -> Result<(), AgentError> {
        if self.contains_order_id(exit_order_id) {
            return Err(AgentError::DuplicateOrderId {
                id: exit_order_id.to_string(),
            });
        }
        let position = self.position_mut(id)?;
        position.transition(PositionState::PendingSell)?;
        position.exit_order_id = Some(exit_order_id.to_string());
        position.profit = estimated_profit;
        position.submitted_at = now;
        Ok(())
    }

    fn next_placeholder_id(&self) -> String {
        (1..)
            .map(|n: u64| format!("{}{}", PLACEHOLDER_PREFIX, n))
            .find(|id| !self.contains_order_id(id))
            .unwrap_or_else(|| format!("{}0", PLACEHOLDER_PREFIX))
    }

    /// Record a position bought outside the agent. It enters the ledger
    /// already `Bought` under a placeholder id.
    pub fn record_manual_buy(
        &mut self,
        instrument: &str,
        quantity: f64,
        price: f64,
        now: NaiveDateTime,
    ) -> Result<String, AgentError> {
        if quantity.is_nan() || quantity <= 0.0 || price.is_nan() || price <= 0.0 {
            return Err(AgentError::InvalidPrice {
                instrument: instrument.to_string(),
                price,
            });
        }
        let id = self.next_placeholder_id();
        let mut position = Position::pending_buy(&id, instrument, quantity, price, now);
        position.transition(PositionState::Bought)?;
        self.open(position)?;
        Ok(id)
    }

    /// Record a sale made outside the agent at `price`.
    pub fn record_manual_sale(&mut self, id: &str, price: f64) -> Result<&Position, AgentError> {
        let position = self.position_mut(id)?;
        if price.is_nan() || price <= 0.0 {
            return Err(AgentError::InvalidPrice {
                instrument: position.instrument.clone(),
                price,
            });
        }
        if position.state == PositionState::Bought {
            position.transition(PositionState::PendingSell)?;
        }
        position.transition(PositionState::Sold)?;
        position.profit = round_to(position.quantity * price - position.cost(), 3);
        Ok(position)
    }

    /// Drop a position whatever its state. Used when a holding is known to
    /// be gone without a sale.
    pub fn discard(&mut self, id: &str) -> Result<Position, AgentError> {
        self.positions
            .remove(id)
            .ok_or_else(|| AgentError::PositionNotFound { id: id.to_string() })
    }

    /// Remove a terminal position.
    pub fn remove(&mut self, id: &str) -> Result<Position, AgentError> {
        let state = self
            .get(id)
            .map(|p| p.state)
            .ok_or_else(|| AgentError::PositionNotFound { id: id.to_string() })?;
        if !state.is_terminal() {
            return Err(AgentError::PositionNotTerminal {
                id: id.to_string(),
                state,
            });
        }
        self.discard(id)
    }

    /// Remove every terminal position and return them.
    pub fn prune_terminal(&mut self) -> Vec<Position> {
        let ids: Vec<String> = self
            .positions
            .values()
            .filter(|p| p.state.is_terminal())
            .map(|p| p.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.positions.remove(id))
            .collect()
    }

    /// Resolve pending orders against the venue's current open-order list.
    ///
    /// A pending order missing from the list is first marked cancel-pending.
    /// If it was submitted more than `cancel_after` ago it is cancelled at the
    /// venue, otherwise it is taken as filled. Venue failures count against
    /// `breaker` and leave the position pending for the next pass.
    pub fn reconcile_pending(
        &mut self,
        now: NaiveDateTime,
        venue: &mut dyn VenuePort,
        breaker: &mut CircuitBreaker,
        cancel_after: Duration,
    ) -> Result<ReconcileReport, AgentError> {
        let mut report = ReconcileReport::default();
        let pending: Vec<String> = self
            .positions
            .values()
            .filter(|p| p.state.is_pending())
            .map(|p| p.id.clone())
            .collect();
        if pending.is_empty() {
            return Ok(report);
        }

        let open: HashSet<String> = match breaker.observe(venue.list_open_orders()) {
            Ok(orders) => orders.into_iter().collect(),
            Err(e) => {
                error!(operation = "list_open_orders", error = %e, "could not reconcile pending orders");
                report.open_orders_unavailable = true;
                return Ok(report);
            }
        };

        for id in pending {
            let position = self.position_mut(&id)?;
            let order_id = position.active_order_id().to_string();
            if open.contains(&order_id) {
                report.still_open.push(id);
                continue;
            }

            let pending_state = position.state;
            let Some(marked) = pending_state.cancel_pending() else {
                continue;
            };
            position.transition(marked)?;

            if now - position.submitted_at > cancel_after {
                match breaker.observe(venue.cancel_order(&order_id)) {
                    Ok(()) => {
                        position.transition(PositionState::Cancelled)?;
                        position.profit = 0.0;
                        info!(position = %id, order = %order_id, "order timed out and was cancelled");
                        report.cancelled.push(id);
                    }
                    Err(e) => {
                        position.transition(pending_state)?;
                        warn!(position = %id, order = %order_id, error = %e, "cancel request failed, will retry");
                        report.cancel_failures.push(id);
                    }
                }
                continue;
            }

            let Some(confirmed) = marked.confirmed() else {
                continue;
            };
            position.transition(confirmed)?;
            info!(position = %id, order = %order_id, state = %confirmed, "order no longer open, confirmed");
            match confirmed {
                PositionState::Sold => report.confirmed_sells.push(id),
                _ => report.confirmed_buys.push(id),
            }
        }

        Ok(report)
    }

    fn position_mut(&mut self, id: &str) -> Result<&mut Position, AgentError> {
        self.positions
            .get_mut(id)
            .ok_or_else(|| AgentError::PositionNotFound { id: id.to_string() })
    }
}
