//! CLI definition and dispatch.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvStateStore;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::kraken_adapter::KrakenMarketData;
use crate::adapters::ledger_export::export_ledger;
use crate::adapters::paper_venue::{PaperVenue, PriceBoard, RecordingMarketData};
use crate::adapters::simulated::SimulatedMarketData;
use crate::domain::config::{AgentConfig, DataSource, PaperConfig, StateBackend, StateConfig};
use crate::domain::config_validation::load_agent_config;
use crate::domain::error::AgentError;
use crate::domain::ledger::PositionLedger;
use crate::domain::orchestrator::TradingCycleOrchestrator;
use crate::domain::position::{Position, PositionState};
use crate::domain::runner::{RunOutcome, Runner, ShutdownSignal, SystemClock};
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::persistence_port::PersistencePort;

pub const DEFAULT_LOG_FILTER: &str = "polltrader=info";

#[derive(Parser, Debug)]
#[command(name = "polltrader", about = "Polling trading agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the trading loop until interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Inspect or edit the position ledger
    Positions {
        #[arg(short, long)]
        config: PathBuf,
        #[command(subcommand)]
        action: PositionsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum PositionsAction {
    /// List positions, optionally only those in one state
    List {
        #[arg(long)]
        state: Option<PositionState>,
    },
    /// Record a position bought outside the agent
    Add {
        #[arg(long)]
        instrument: String,
        #[arg(long)]
        quantity: f64,
        #[arg(long)]
        price: f64,
    },
    /// Mark a position sold at a price; a price of 0 drops it
    Sell {
        #[arg(long)]
        id: String,
        #[arg(long)]
        price: f64,
    },
    /// Move a position to another state along a legal transition
    Status {
        #[arg(long)]
        id: String,
        /// Target state, as a code (B, PS, ...) or a name
        #[arg(long)]
        state: PositionState,
    },
    /// Remove a sold or cancelled position
    Remove {
        #[arg(long)]
        id: String,
    },
    /// Remove every sold or cancelled position
    Prune,
    /// Write the ledger to a CSV file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    let result = match cli.command {
        Command::Run { config, cycles } => run_agent(&config, cycles),
        Command::Validate { config } => run_validate(&config),
        Command::Positions { config, action } => run_positions(&config, action),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A subscriber may already be installed, e.g. by a test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &Path) -> Result<AgentConfig, AgentError> {
    let adapter = FileConfigAdapter::from_file(path)?;
    load_agent_config(&adapter)
}

pub fn open_store(state: &StateConfig) -> Result<Box<dyn PersistencePort>, AgentError> {
    match state.backend {
        StateBackend::Csv => Ok(Box::new(CsvStateStore::new(state.path.clone()))),
        #[cfg(feature = "sqlite")]
        StateBackend::Sqlite => {
            use crate::adapters::sqlite_adapter::SqliteStateStore;
            Ok(Box::new(SqliteStateStore::open(&state.path)?))
        }
        #[cfg(not(feature = "sqlite"))]
        StateBackend::Sqlite => Err(AgentError::invalid(
            "state",
            "backend",
            "built without sqlite support",
        )),
    }
}

/// Market data source selected by the configuration. Simulated external
/// calls always use the random walk.
pub fn build_market_data(config: &AgentConfig) -> Result<Box<dyn MarketDataPort>, AgentError> {
    let source = if config.simulate_external_calls {
        DataSource::Simulated
    } else {
        config.market_data.source
    };
    Ok(match source {
        DataSource::Simulated => Box::new(SimulatedMarketData::new()),
        DataSource::Kraken => Box::new(KrakenMarketData::new(&config.market_data, &config.instruments)?),
    })
}

/// Restore state from `store` and wire the orchestrator to the paper venue.
pub fn build_orchestrator(
    config: AgentConfig,
    store: &dyn PersistencePort,
    market_data: Box<dyn MarketDataPort>,
) -> Result<TradingCycleOrchestrator, AgentError> {
    if !config.simulate_external_calls {
        warn!("no brokerage venue is configured, orders go to the paper venue");
    }
    let positions = store.load_positions()?;
    let rows = store.load_series()?;

    let board = PriceBoard::new();
    let venue = paper_venue(&config.paper, &positions, board.clone());
    let market_data = RecordingMarketData::new(market_data, board);
    TradingCycleOrchestrator::start(config, Box::new(venue), Box::new(market_data), positions, rows)
}

/// Paper venue holding every `Bought` position. Pending sells are already
/// committed and pending buys have not filled.
pub fn paper_venue(config: &PaperConfig, positions: &[Position], board: PriceBoard) -> PaperVenue {
    let mut venue = PaperVenue::new(config, board);
    for p in positions.iter().filter(|p| p.state == PositionState::Bought) {
        venue.hold(&p.instrument, p.quantity);
    }
    venue
}

fn run_agent(config_path: &Path, cycles: Option<u64>) -> Result<(), AgentError> {
    eprintln!("Loading config from {}", config_path.display());
    let config = load_config(config_path)?;
    let store = open_store(&config.state)?;
    let market_data = build_market_data(&config)?;
    let orchestrator = build_orchestrator(config, store.as_ref(), market_data)?;

    let shutdown = ShutdownSignal::new();
    spawn_signal_listener(shutdown.clone())?;

    let mut runner = Runner::new(orchestrator, store, SystemClock::new(shutdown));
    if let Some(n) = cycles {
        runner = runner.with_max_cycles(n);
    }
    match runner.run()? {
        RunOutcome::Stopped { cycles } => info!(cycles, "stopped"),
        RunOutcome::Completed { cycles } => info!(cycles, "completed"),
    }
    Ok(())
}

/// Trigger `shutdown` on SIGINT or SIGTERM from a background thread.
fn spawn_signal_listener(shutdown: ShutdownSignal) -> Result<(), AgentError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if runtime.block_on(wait_for_signal()) {
                info!("shutdown signal received");
                shutdown.trigger();
            }
        })?;
    Ok(())
}

/// Resolves true once a termination signal arrives, false if signals
/// cannot be watched.
async fn wait_for_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                res = tokio::signal::ctrl_c() => res.is_ok(),
                _ = term.recv() => true,
            },
            Err(e) => {
                warn!(error = %e, "cannot watch SIGTERM");
                tokio::signal::ctrl_c().await.is_ok()
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.is_ok()
    }
}

fn run_validate(config_path: &Path) -> Result<(), AgentError> {
    let config = load_config(config_path)?;
    println!("Configuration is valid.");
    println!("  instruments:   {}", config.instruments.join(", "));
    println!("  interval:      {} min", config.interval_minutes);
    println!("  cancel after:  {} min", config.cancel_after_minutes);
    println!("  buy strategy:  {}", config.strategy.buy);
    println!("  sell strategy: {}", config.strategy.sell);
    println!("  indicators:    {}", config.windows);
    let source = if config.simulate_external_calls {
        "simulated (external calls simulated)".to_string()
    } else {
        config.market_data.source.to_string()
    };
    println!("  market data:   {}", source);
    println!(
        "  state:         {:?} at {}",
        config.state.backend,
        config.state.path.display()
    );
    println!(
        "  trading:       {}",
        if config.trades_enabled { "enabled" } else { "dry run" }
    );
    Ok(())
}

fn run_positions(config_path: &Path, action: PositionsAction) -> Result<(), AgentError> {
    let config = load_config(config_path)?;
    let store = open_store(&config.state)?;
    let mut ledger = PositionLedger::from_positions(store.load_positions()?)?;

    match action {
        PositionsAction::List { state } => {
            let prices = last_prices(store.as_ref())?;
            print_positions(&ledger, state, &prices);
            return Ok(());
        }
        PositionsAction::Export { output } => {
            let prices = last_prices(store.as_ref())?;
            let written = export_ledger(&output, &ledger.positions(), &prices)?;
            println!("Exported {} positions to {}", written, output.display());
            return Ok(());
        }
        PositionsAction::Add {
            instrument,
            quantity,
            price,
        } => {
            let instrument = instrument.trim().to_uppercase();
            let id = ledger.record_manual_buy(&instrument, quantity, price, Utc::now().naive_utc())?;
            println!("Recorded {} {} @ {} as {}", quantity, instrument, price, id);
        }
        PositionsAction::Sell { id, price } => {
            if price == 0.0 {
                let dropped = ledger.discard(&id)?;
                println!("Dropped {} ({} {})", dropped.id, dropped.quantity, dropped.instrument);
            } else {
                let sold = ledger.record_manual_sale(&id, price)?;
                println!("Marked {} sold @ {} (profit {:.3})", sold.id, price, sold.profit);
            }
        }
        PositionsAction::Status { id, state } => {
            let previous = ledger.transition(&id, state)?;
            println!("Moved {} from {} to {}", id, previous, state);
        }
        PositionsAction::Remove { id } => {
            let removed = ledger.remove(&id)?;
            println!("Removed {} ({})", removed.id, removed.state);
        }
        PositionsAction::Prune => {
            let pruned = ledger.prune_terminal();
            println!("Pruned {} positions", pruned.len());
        }
    }
    store.save_positions(&ledger.snapshot())
}

/// Last stored price per instrument.
fn last_prices(store: &dyn PersistencePort) -> Result<HashMap<String, f64>, AgentError> {
    let mut prices: HashMap<String, (chrono::NaiveDateTime, f64)> = HashMap::new();
    for row in store.load_series()? {
        let newer = prices
            .get(&row.instrument)
            .is_none_or(|&(ts, _)| row.timestamp > ts);
        if newer {
            prices.insert(row.instrument.clone(), (row.timestamp, row.price));
        }
    }
    Ok(prices.into_iter().map(|(k, (_, p))| (k, p)).collect())
}

fn print_positions(
    ledger: &PositionLedger,
    state: Option<PositionState>,
    prices: &HashMap<String, f64>,
) {
    println!(
        "{:<20} {:<6} {:<10} {:>14} {:>14} {:>12} {:>12}",
        "ID", "STATE", "INSTRUMENT", "QUANTITY", "PRICE", "COST", "VALUE"
    );
    let mut shown = 0;
    for p in ledger.positions() {
        if state.is_some_and(|s| s != p.state) {
            continue;
        }
        let value = prices
            .get(&p.instrument)
            .map(|&price| format!("{:.3}", p.market_value(price)))
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "{:<20} {:<6} {:<10} {:>14} {:>14} {:>12.3} {:>12}",
            p.id,
            p.state.code(),
            p.instrument,
            p.quantity,
            p.entry_price,
            p.cost(),
            value
        );
        shown += 1;
    }
    println!("{} positions", shown);
}
