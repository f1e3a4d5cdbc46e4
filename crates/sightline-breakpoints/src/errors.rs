//! Error types for the breakpoint subsystem.

use thiserror::Error;

/// Errors surfaced by breakpoint management.
#[derive(Debug, Error)]
pub enum BreakpointError {
    /// Rejected definition: bad condition, bad pattern or capacity exceeded.
    #[error("invalid breakpoint: {0}")]
    Validation(String),

    /// No breakpoint with this id.
    #[error("breakpoint not found: {0}")]
    NotFound(String),

    /// The persisted breakpoint file is unreadable.
    #[error("breakpoint storage error: {0}")]
    Persistence(String),

    /// Filesystem error while reading or writing the breakpoint file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for breakpoint results.
pub type Result<T> = std::result::Result<T, BreakpointError>;
