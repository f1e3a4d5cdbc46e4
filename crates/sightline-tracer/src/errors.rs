//! Errors from setting up a trace logger.
//!
//! Recording itself never fails outward; these only surface from
//! construction.

use thiserror::Error;

/// Tracer setup errors.
#[derive(Debug, Error)]
pub enum TracerError {
    /// The persistence worker thread could not be started.
    #[error("failed to start persistence worker: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, TracerError>;
