//! End-to-end tests of the trading cycle and the polling loop.
//!
//! Tests cover:
//! - Circuit breaker halting the loop with a single final flush
//! - Shutdown signal stopping the loop with a single final flush
//! - Reconciliation: timeout cancellation versus fill confirmation
//! - Per-instrument eviction
//! - Buy and sell flow, including dry runs
//! - Data-quality properties (anomaly rejection, undefined indicators)

mod common;

use common::*;
use polltrader::domain::error::AgentError;
use polltrader::domain::orchestrator::TradingCycleOrchestrator;
use polltrader::domain::position::{Position, PositionState};
use polltrader::domain::price::PriceRow;
use polltrader::adapters::simulated::SimulatedMarketData;
use polltrader::domain::runner::{RunOutcome, Runner, ShutdownSignal, SystemClock};
use polltrader::ports::venue_port::OrderSide;

fn start(
    config: polltrader::domain::config::AgentConfig,
    venue: &MockVenue,
    market: &MockMarketData,
    positions: Vec<Position>,
    rows: Vec<PriceRow>,
) -> TradingCycleOrchestrator {
    TradingCycleOrchestrator::start(
        config,
        Box::new(venue.clone()),
        Box::new(market.clone()),
        positions,
        rows,
    )
    .unwrap()
}

/// Gently rising prices that never trigger the test strategies.
fn rising(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + i as f64 * 0.1).collect()
}

mod circuit_breaker_halt {
    use super::*;

    #[test]
    fn five_failures_halt_the_loop_and_flush_once() {
        let config = test_config();
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        market.set_failing(true);
        let store = MemoryStore::new();

        let rows = history("ETH", &rising(10), t0(), 5);
        let orchestrator = start(config, &venue, &market, Vec::new(), rows);

        // The clock never moves, so the saved history stays gap-free and
        // each cycle makes exactly one external call: the price fetch.
        let clock = ManualClock::new(t0(), minutes(0));
        let mut runner = Runner::new(orchestrator, Box::new(store.clone()), clock);

        let err = runner.run().unwrap_err();
        assert!(matches!(err, AgentError::CircuitBreakerTripped { failures: 5 }));

        assert_eq!(market.latest_calls(), 5, "no sixth cycle was attempted");
        assert_eq!(market.history_calls(), 0);
        assert!(runner.orchestrator().breaker().is_tripped());

        // One save per completed cycle plus exactly one final flush.
        assert_eq!(store.position_saves(), 6);
        assert_eq!(store.series_saves(), 6);
        assert_eq!(store.state.borrow().rows.len(), 10);
    }

    #[test]
    fn a_success_resets_the_count() {
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let rows = history("ETH", &rising(10), t0(), 5);
        let mut orch = start(test_config(), &venue, &market, Vec::new(), rows);

        market.set_failing(true);
        for _ in 0..4 {
            orch.run_cycle(t0()).unwrap();
        }
        assert_eq!(orch.breaker().failures(), 4);

        market.set_failing(false);
        orch.run_cycle(t0()).unwrap();
        assert_eq!(orch.breaker().failures(), 0);
    }

    #[test]
    fn completed_run_flushes_after_last_cycle() {
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let store = MemoryStore::new();
        let rows = history("ETH", &rising(10), t0(), 5);
        let orchestrator = start(test_config(), &venue, &market, Vec::new(), rows);

        let clock = ManualClock::new(t0(), minutes(5));
        let mut runner = Runner::new(orchestrator, Box::new(store.clone()), clock).with_max_cycles(3);
        assert_eq!(runner.run().unwrap(), RunOutcome::Completed { cycles: 3 });
        assert_eq!(store.series_saves(), 4);
        assert_eq!(store.state.borrow().rows.len(), 13);
    }
}

mod shutdown {
    use super::*;

    #[test]
    fn signal_stops_the_loop_and_flushes_once() {
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let store = MemoryStore::new();
        let rows = history("ETH", &rising(10), t0(), 5);
        let orchestrator = start(test_config(), &venue, &market, Vec::new(), rows);

        let clock = ManualClock::new(t0(), minutes(5)).stopping_after(4);
        let mut runner = Runner::new(orchestrator, Box::new(store.clone()), clock);
        assert_eq!(runner.run().unwrap(), RunOutcome::Stopped { cycles: 4 });

        // One save per cycle plus exactly one final flush.
        assert_eq!(store.position_saves(), 5);
        assert_eq!(store.series_saves(), 5);
        assert_eq!(market.latest_calls(), 4);
        assert_eq!(store.state.borrow().rows.len(), 14);
    }

    #[test]
    fn signal_raised_before_start_runs_one_cycle() {
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let store = MemoryStore::new();
        let mut config = test_config();
        config.trades_enabled = false;
        let orchestrator = start(config, &venue, &market, Vec::new(), Vec::new());

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let mut runner = Runner::new(orchestrator, Box::new(store.clone()), SystemClock::new(shutdown));
        assert_eq!(runner.run().unwrap(), RunOutcome::Stopped { cycles: 1 });
        assert_eq!(store.position_saves(), 2);
        assert_eq!(store.series_saves(), 2);
    }
}

mod simulated_source {
    use super::*;

    #[test]
    fn backfill_follows_cycle_time() {
        let venue = MockVenue::new();
        let mut config = test_config();
        config.trades_enabled = false;
        let market = SimulatedMarketData::seeded(7).with_price("ETH", 2000.0);
        let mut orch = TradingCycleOrchestrator::start(
            config,
            Box::new(venue.clone()),
            Box::new(market),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        let report = orch.run_cycle(t0()).unwrap();
        assert_eq!(report.reloaded, vec!["ETH".to_string()]);
        assert!(report.rejections.is_empty());
        assert!(!report.trading_locked);
        assert_eq!(orch.series().len("ETH"), 50);
        assert_eq!(orch.series().rows("ETH").last().unwrap().timestamp, t0());
    }
}

mod reconciliation {
    use super::*;

    fn pending_buy(submitted: chrono::NaiveDateTime) -> Position {
        Position::pending_buy("ord-77", "ETH", 1.0, 100.0, submitted)
    }

    fn run_once(venue: &MockVenue, position: Position, now_offset: i64) -> TradingCycleOrchestrator {
        let market = MockMarketData::new();
        let now = t0() + minutes(now_offset);
        let rows = history("ETH", &rising(10), now, 5);
        let mut config = test_config();
        config.trades_enabled = false;
        let mut orch = start(config, venue, &market, vec![position], rows);
        orch.run_cycle(now).unwrap();
        orch
    }

    #[test]
    fn missing_order_past_timeout_is_cancelled_once() {
        let venue = MockVenue::new();
        let orch = run_once(&venue, pending_buy(t0()), 25);
        assert_eq!(orch.ledger().get("ord-77").unwrap().state, PositionState::Cancelled);
        assert_eq!(venue.cancelled(), vec!["ord-77".to_string()]);
    }

    #[test]
    fn missing_order_within_timeout_is_confirmed() {
        let venue = MockVenue::new();
        let orch = run_once(&venue, pending_buy(t0()), 10);
        assert_eq!(orch.ledger().get("ord-77").unwrap().state, PositionState::Bought);
        assert!(venue.cancelled().is_empty());
    }

    #[test]
    fn open_order_stays_pending() {
        let venue = MockVenue::new();
        venue.set_open_orders(&["ord-77"]);
        let orch = run_once(&venue, pending_buy(t0()), 60);
        assert_eq!(orch.ledger().get("ord-77").unwrap().state, PositionState::PendingBuy);
        assert!(venue.cancelled().is_empty());
    }

    #[test]
    fn open_orders_failure_leaves_positions_untouched() {
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let now = t0() + minutes(60);
        let rows = history("ETH", &rising(10), now, 5);
        let mut orch = start(test_config(), &venue, &market, vec![pending_buy(t0())], rows);

        venue.set_failing(true);
        let report = orch.run_cycle(now).unwrap();
        assert!(report.reconcile.open_orders_unavailable);
        assert_eq!(orch.ledger().get("ord-77").unwrap().state, PositionState::PendingBuy);
        assert!(orch.breaker().failures() >= 1);
    }
}

mod eviction {
    use super::*;

    #[test]
    fn keeps_max_rows_in_time_order() {
        let ini = TEST_INI.replace("max_rows = 50", "max_rows = 8");
        let config = config_from(&ini);
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let rows = history("ETH", &rising(12), t0(), 5);
        let mut orch = start(config, &venue, &market, Vec::new(), rows);
        assert_eq!(orch.series().len("ETH"), 8);

        for i in 0..5 {
            let now = t0() + minutes(5 * i);
            let report = orch.run_cycle(now).unwrap();
            assert_eq!(report.evicted, 1);
            let kept = orch.series().rows("ETH");
            assert_eq!(kept.len(), 8);
            assert_eq!(kept.last().unwrap().timestamp, now);
            assert!(kept.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }
}

mod trading_flow {
    use super::*;

    /// Ten falling prices, then a further 3% drop: cheap against the fast
    /// SMA with an RSI of zero.
    fn falling_setup(trades_enabled: bool) -> (MockVenue, MockMarketData, TradingCycleOrchestrator) {
        let mut config = test_config();
        config.trades_enabled = trades_enabled;
        let prices: Vec<f64> = (0..11).map(|i| 110.0 - i as f64).collect();
        let rows = history("ETH", &prices, t0(), 5);

        let venue = MockVenue::new();
        venue.set_quote("ETH", 96.9, 97.0);
        let market = MockMarketData::new();
        market.script("ETH", &[97.0, 99.0, 99.5]);
        let orch = start(config, &venue, &market, Vec::new(), rows);
        (venue, market, orch)
    }

    #[test]
    fn buy_confirm_sell_confirm() {
        let (venue, _market, mut orch) = falling_setup(true);

        let report = orch.run_cycle(t0()).unwrap();
        assert!(!report.trading_locked);
        assert_eq!(report.buys.len(), 1);
        let placed = venue.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Buy);
        assert_eq!(placed[0].price, 97.0);
        assert!((placed[0].quantity - 10.309).abs() < 1e-9);
        let id = placed[0].id.clone();
        assert_eq!(orch.ledger().get(&id).unwrap().state, PositionState::PendingBuy);

        // Filled: gone from the open list. The price clears the profit target.
        venue.set_quote("ETH", 98.9, 99.1);
        let report = orch.run_cycle(t0() + minutes(5)).unwrap();
        assert_eq!(report.reconcile.confirmed_buys, vec![id.clone()]);
        assert_eq!(report.sells.len(), 1);
        let sold = orch.ledger().get(&id).unwrap();
        assert_eq!(sold.state, PositionState::PendingSell);
        assert_eq!(sold.exit_order_id.as_deref(), Some("ord-2"));
        assert!((sold.profit - 19.587).abs() < 1e-9);

        let report = orch.run_cycle(t0() + minutes(10)).unwrap();
        assert_eq!(report.reconcile.confirmed_sells, vec![id.clone()]);
        assert_eq!(orch.ledger().get(&id).unwrap().state, PositionState::Sold);
        assert!(report.buys.is_empty());
    }

    #[test]
    fn zero_threshold_stop_loss_sells_any_loss() {
        let mut config = test_config();
        config.trading.stop_loss_threshold = 0.0;
        let mut position = Position::pending_buy("ord-9", "ETH", 1.0, 105.0, t0() - minutes(60));
        position.transition(PositionState::Bought).unwrap();

        let venue = MockVenue::new();
        venue.set_quote("ETH", 100.9, 101.1);
        let market = MockMarketData::new();
        let rows = history("ETH", &rising(10), t0(), 5);
        let mut orch = start(config, &venue, &market, vec![position.clone()], rows.clone());

        let report = orch.run_cycle(t0()).unwrap();
        assert_eq!(report.sells.len(), 1);
        assert_eq!(orch.ledger().get("ord-9").unwrap().state, PositionState::PendingSell);
        let placed = venue.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Sell);

        // The default threshold tolerates a small loss.
        let venue = MockVenue::new();
        venue.set_quote("ETH", 100.9, 101.1);
        let mut orch = start(test_config(), &venue, &MockMarketData::new(), vec![position], rows);
        let report = orch.run_cycle(t0()).unwrap();
        assert!(report.sells.is_empty());
        assert_eq!(orch.ledger().get("ord-9").unwrap().state, PositionState::Bought);
    }

    #[test]
    fn dry_run_records_intent_only() {
        let (venue, _market, mut orch) = falling_setup(false);
        let report = orch.run_cycle(t0()).unwrap();
        assert_eq!(report.buys.len(), 1);
        assert_eq!(report.buys[0].order_id, None);
        assert_eq!(report.buys[0].price, 97.0);
        assert!(venue.placed().is_empty());
        assert!(orch.ledger().is_empty());
    }

    #[test]
    fn anomalous_price_locks_trading() {
        let (venue, market, mut orch) = falling_setup(true);
        market.script("ETH", &[60.0]);
        let report = orch.run_cycle(t0()).unwrap();
        assert!(report.trading_locked);
        assert_eq!(report.rejections.len(), 1);
        assert!(report.buys.is_empty());
        assert!(venue.placed().is_empty());
        assert_eq!(orch.series().last_price("ETH"), Some(100.0));
    }

    #[test]
    fn gap_triggers_history_reload() {
        let venue = MockVenue::new();
        let market = MockMarketData::new();
        let now = t0() + minutes(120);
        market.set_history("ETH", history("ETH", &rising(20), now, 5));
        let mut config = test_config();
        config.trades_enabled = false;
        let mut orch = start(config, &venue, &market, Vec::new(), history("ETH", &rising(10), t0(), 5));

        let report = orch.run_cycle(now).unwrap();
        assert_eq!(report.reloaded, vec!["ETH".to_string()]);
        assert_eq!(market.history_calls(), 1);
        assert!(!report.trading_locked);
        assert_eq!(orch.series().len("ETH"), 21);
    }
}

mod properties {
    use super::*;
    use polltrader::domain::indicator::{ComputeMode, IndicatorEngine, IndicatorWindows};
    use polltrader::domain::series::{IngestOutcome, RejectReason, TimeSeriesStore};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn large_moves_never_enter_the_series(
            base in 1.0f64..100_000.0,
            jump in 0.3001f64..0.99,
            up in any::<bool>(),
        ) {
            let config = test_config();
            let mut series = TimeSeriesStore::new(config.series_config(), &config.instruments);
            prop_assert_eq!(series.ingest("ETH", base, t0()).unwrap(), IngestOutcome::Accepted);

            let factor = if up { 1.0 + jump } else { 1.0 - jump };
            let bad = base * factor;
            for attempt in 1..=2 {
                let outcome = series.ingest("ETH", bad, t0() + minutes(5 * attempt)).unwrap();
                let rejected = matches!(outcome, IngestOutcome::Rejected(RejectReason::AnomalousDelta { .. }));
                prop_assert!(rejected);
                prop_assert_eq!(series.len("ETH"), 1);
                prop_assert_eq!(series.last_price("ETH"), Some(base));
            }
        }

        #[test]
        fn indicators_undefined_before_lookback(
            prices in prop::collection::vec(1.0f64..1000.0, 1..60),
            backfill in any::<bool>(),
        ) {
            let windows = IndicatorWindows::default();
            let engine = IndicatorEngine::new(windows);
            let mut rows = history("ETH", &prices, t0(), 5);
            let mode = if backfill { ComputeMode::Backfill } else { ComputeMode::Live };
            engine.recompute(&mut rows, mode);

            let sma_first = if backfill { windows.sma_fast } else { windows.sma_fast - 1 };
            for (i, row) in rows.iter().enumerate() {
                let c = &row.indicators;
                if i < sma_first {
                    prop_assert!(c.sma_fast.is_nan());
                }
                if i + 1 < windows.ema_fast {
                    prop_assert!(c.ema_fast.is_nan());
                }
                if i < windows.rsi_period {
                    prop_assert!(c.rsi.is_nan());
                }
                if i + 1 < windows.macd_slow {
                    prop_assert!(c.macd.is_nan());
                }
            }
        }

        #[test]
        fn undefined_indicators_never_trigger_a_buy(
            prices in prop::collection::vec(1.0f64..1000.0, 1..12),
        ) {
            use polltrader::domain::strategy::{BuyStrategy, StrategyEvaluator, SellStrategy, StrategyParams};
            let engine = IndicatorEngine::new(IndicatorWindows::default());
            let mut rows = history("ETH", &prices, t0(), 5);
            engine.recompute(&mut rows, ComputeMode::Live);
            for buy in BuyStrategy::ALL {
                let evaluator = StrategyEvaluator::new(buy, SellStrategy::AboveBuy, StrategyParams::default());
                prop_assert!(!evaluator.should_buy("ETH", &rows));
            }
        }
    }
}
