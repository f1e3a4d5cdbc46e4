//! Errors surfaced by circuit-protected calls.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a call that did not produce a value.
///
/// `CircuitOpen` and `OperationTimeout` are backpressure signals the caller
/// is expected to act on; `Inner` carries the wrapped operation's own error.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without running it.
    #[error("circuit '{name}' is open")]
    CircuitOpen {
        /// Breaker name.
        name: String,
    },
    /// The call ran longer than the breaker allows.
    #[error("operation under circuit '{name}' took {elapsed:?}, limit {limit:?}")]
    OperationTimeout {
        /// Breaker name.
        name: String,
        /// Measured duration.
        elapsed: Duration,
        /// Configured limit.
        limit: Duration,
    },
    /// The wrapped operation failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the breaker refused to run the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The wrapped error, if the operation itself failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
