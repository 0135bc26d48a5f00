//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod kraken_adapter;
pub mod ledger_export;
pub mod paper_venue;
pub mod simulated;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
