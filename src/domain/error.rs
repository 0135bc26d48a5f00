//! Domain error types.

use crate::domain::position::PositionState;

/// Top-level error type for polltrader.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown {side} strategy '{name}'")]
    UnknownStrategy { side: String, name: String },

    #[error("venue call {operation} failed: {reason}")]
    Venue { operation: String, reason: String },

    #[error("market data call {operation} failed: {reason}")]
    MarketData { operation: String, reason: String },

    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    #[error("invalid price {price} for {instrument}")]
    InvalidPrice { instrument: String, price: f64 },

    #[error("illegal transition for position {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: PositionState,
        to: PositionState,
    },

    #[error("order id {id} is already tracked")]
    DuplicateOrderId { id: String },

    #[error("position {id} not found")]
    PositionNotFound { id: String },

    #[error("position {id} is {state} and cannot be removed")]
    PositionNotTerminal { id: String, state: PositionState },

    #[error("circuit breaker tripped after {failures} consecutive external failures")]
    CircuitBreakerTripped { failures: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn venue(operation: &str, reason: impl ToString) -> Self {
        AgentError::Venue {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn market_data(operation: &str, reason: impl ToString) -> Self {
        AgentError::MarketData {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn persistence(reason: impl ToString) -> Self {
        AgentError::Persistence {
            reason: reason.to_string(),
        }
    }

    pub fn invalid(section: &str, key: &str, reason: impl ToString) -> Self {
        AgentError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Failures of external calls that are retried on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Venue { .. } | AgentError::MarketData { .. })
    }
}

impl From<&AgentError> for std::process::ExitCode {
    fn from(err: &AgentError) -> Self {
        let code: u8 = match err {
            AgentError::Io(_) => 1,
            AgentError::ConfigParse { .. }
            | AgentError::ConfigMissing { .. }
            | AgentError::ConfigInvalid { .. } => 2,
            AgentError::Persistence { .. } => 3,
            AgentError::UnknownStrategy { .. } => 4,
            AgentError::Venue { .. }
            | AgentError::MarketData { .. }
            | AgentError::CircuitBreakerTripped { .. } => 5,
            AgentError::InvalidPrice { .. }
            | AgentError::IllegalTransition { .. }
            | AgentError::DuplicateOrderId { .. }
            | AgentError::PositionNotFound { .. }
            | AgentError::PositionNotTerminal { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
