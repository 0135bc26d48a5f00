//! Consecutive-failure counter for external calls.
//!
//! Every venue or market-data call reports its outcome here. A success resets
//! the counter; once `threshold` consecutive failures have been recorded the
//! breaker is tripped and the orchestrator refuses to start another cycle.

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    threshold: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        CircuitBreaker {
            consecutive_failures: 0,
            threshold,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    /// Record the outcome of an external call and pass it through.
    pub fn observe<T, E>(&mut self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => {
                self.record_failure();
            }
        }
        result
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }
}
