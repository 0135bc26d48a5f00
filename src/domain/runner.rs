//! The polling loop.
//!
//! [`Runner`] drives [`TradingCycleOrchestrator::run_cycle`] once per
//! interval, persists state after every cycle, and flushes exactly once more
//! on whatever path leaves the loop.

use crate::domain::error::AgentError;
use crate::domain::orchestrator::TradingCycleOrchestrator;
use crate::ports::persistence_port::PersistencePort;
use chrono::{NaiveDateTime, Utc};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Cloneable flag that wakes any thread waiting on it once triggered.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *triggered = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block for up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut triggered = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = cvar
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            triggered = guard;
        }
        *triggered
    }
}

/// Source of time for the loop.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    /// Wait before the next cycle. Returns false when the loop should stop.
    fn wait(&self, duration: Duration) -> bool;
}

/// Wall clock in UTC, interruptible through a [`ShutdownSignal`].
pub struct SystemClock {
    shutdown: ShutdownSignal,
}

impl SystemClock {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        SystemClock { shutdown }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn wait(&self, duration: Duration) -> bool {
        !self.shutdown.wait_timeout(duration)
    }
}

/// How the loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped { cycles: u64 },
    Completed { cycles: u64 },
}

pub struct Runner<C: Clock> {
    orchestrator: TradingCycleOrchestrator,
    store: Box<dyn PersistencePort>,
    clock: C,
    max_cycles: Option<u64>,
}

impl<C: Clock> Runner<C> {
    pub fn new(orchestrator: TradingCycleOrchestrator, store: Box<dyn PersistencePort>, clock: C) -> Self {
        Runner {
            orchestrator,
            store,
            clock,
            max_cycles: None,
        }
    }

    /// Stop after `cycles` cycles instead of running until shutdown.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn orchestrator(&self) -> &TradingCycleOrchestrator {
        &self.orchestrator
    }

    pub fn run(&mut self) -> Result<RunOutcome, AgentError> {
        let result = self.run_loop();
        match (&result, self.persist()) {
            (_, Ok(())) => info!("state flushed"),
            (Ok(_), Err(e)) => return Err(e),
            (Err(_), Err(e)) => error!(error = %e, "final flush failed"),
        }
        result
    }

    fn run_loop(&mut self) -> Result<RunOutcome, AgentError> {
        let interval = self.orchestrator.config().interval();
        let mut cycles = 0;
        loop {
            let now = self.clock.now();
            if let Err(e) = self.orchestrator.run_cycle(now) {
                error!(error = %e, cycles, "halting");
                return Err(e);
            }
            cycles += 1;

            if let Err(e) = self.persist() {
                warn!(error = %e, "could not persist state after cycle");
            }

            if self.max_cycles.is_some_and(|max| cycles >= max) {
                return Ok(RunOutcome::Completed { cycles });
            }
            if !self.clock.wait(interval) {
                info!(cycles, "shutdown requested");
                return Ok(RunOutcome::Stopped { cycles });
            }
        }
    }

    fn persist(&self) -> Result<(), AgentError> {
        self.store.save_positions(&self.orchestrator.positions_snapshot())?;
        self.store.save_series(&self.orchestrator.series_snapshot())
    }
}
