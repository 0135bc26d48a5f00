//! Core domain types and logic.

pub mod error;
pub mod config;
pub mod config_validation;
pub mod price;
pub mod series;
pub mod indicator;
pub mod strategy;
pub mod position;
pub mod ledger;
pub mod circuit_breaker;
pub mod execution;
pub mod orchestrator;
pub mod runner;
