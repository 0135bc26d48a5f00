//! polltrader: a polling trading agent.
//!
//! Each cycle pulls the latest prices, keeps a per-instrument series with
//! derived indicators, reconciles pending orders, and places limit orders
//! when the configured strategies fire.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
