//! Market data port trait.

use crate::domain::error::AgentError;
use crate::domain::price::PriceRow;
use chrono::NaiveDateTime;

pub trait MarketDataPort {
    /// Price history at `interval_minutes` spacing, oldest first, with every
    /// row before `now`. Used to rebuild a series after a gap.
    fn get_ohlc_history(
        &mut self,
        instrument: &str,
        interval_minutes: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError>;

    fn get_latest_price(&mut self, instrument: &str) -> Result<f64, AgentError>;
}

impl<M: MarketDataPort + ?Sized> MarketDataPort for Box<M> {
    fn get_ohlc_history(
        &mut self,
        instrument: &str,
        interval_minutes: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<PriceRow>, AgentError> {
        (**self).get_ohlc_history(instrument, interval_minutes, now)
    }

    fn get_latest_price(&mut self, instrument: &str) -> Result<f64, AgentError> {
        (**self).get_latest_price(instrument)
    }
}
