//! State persistence port trait.

use crate::domain::error::AgentError;
use crate::domain::position::Position;
use crate::domain::price::PriceRow;

/// Port for saving and restoring the ledger and the price series.
///
/// Series are stored as raw prices; indicator columns are recomputed after
/// loading.
pub trait PersistencePort {
    fn load_positions(&self) -> Result<Vec<Position>, AgentError>;

    fn save_positions(&self, positions: &[Position]) -> Result<(), AgentError>;

    fn load_series(&self) -> Result<Vec<PriceRow>, AgentError>;

    fn save_series(&self, rows: &[PriceRow]) -> Result<(), AgentError>;
}
