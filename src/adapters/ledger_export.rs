//! Ledger export to CSV.

use crate::adapters::csv_adapter::TIMESTAMP_FORMAT;
use crate::domain::error::AgentError;
use crate::domain::execution::estimate_profit;
use crate::domain::position::{Position, PositionState};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const HEADER: [&str; 9] = [
    "opened_at",
    "order_id",
    "state",
    "instrument",
    "quantity",
    "price",
    "cost",
    "current_value",
    "estimated_profit",
];

const NOT_AVAILABLE: &str = "N/A";

fn export_error(e: csv::Error) -> AgentError {
    AgentError::persistence(format!("ledger export failed: {}", e))
}

/// Value columns for one position: current value and estimated profit.
///
/// Sold positions report their realized profit; live positions are valued
/// at the last known price for their instrument.
fn valuation(position: &Position, last_prices: &HashMap<String, f64>) -> (String, String) {
    match position.state {
        PositionState::Sold => (NOT_AVAILABLE.to_string(), format!("{:.3}", position.profit)),
        PositionState::Cancelled => (NOT_AVAILABLE.to_string(), format!("{:.3}", 0.0)),
        _ => match last_prices.get(&position.instrument) {
            Some(&price) => (
                format!("{:.3}", position.market_value(price)),
                format!("{:.3}", estimate_profit(position, price)),
            ),
            None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
        },
    }
}

/// Write `positions` as CSV to `writer`. Returns the number of rows written.
pub fn write_ledger<W: Write>(
    writer: W,
    positions: &[&Position],
    last_prices: &HashMap<String, f64>,
) -> Result<usize, AgentError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER).map_err(export_error)?;
    for p in positions {
        let (value, profit) = valuation(p, last_prices);
        wtr.write_record([
            p.opened_at.format(TIMESTAMP_FORMAT).to_string(),
            p.active_order_id().to_string(),
            p.state.code().to_string(),
            p.instrument.clone(),
            p.quantity.to_string(),
            p.entry_price.to_string(),
            format!("{:.3}", p.cost()),
            value,
            profit,
        ])
        .map_err(export_error)?;
    }
    wtr.flush()?;
    Ok(positions.len())
}

pub fn export_ledger<P: AsRef<Path>>(
    path: P,
    positions: &[&Position],
    last_prices: &HashMap<String, f64>,
) -> Result<usize, AgentError> {
    let file = File::create(path.as_ref())?;
    write_ledger(file, positions, last_prices)
}
