//! Error types for the trace store.
//!
//! [`StoreError`] is returned by every database, repository and retention
//! operation. Callers on the tracing hot path log and drop it.

use thiserror::Error;

/// Errors that can occur during trace store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem error (archives, backups, exports).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored row could not be mapped back to its record type.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// Offending column.
        column: &'static str,
        /// What was wrong with the value.
        detail: String,
    },

    /// Requested trace was not found.
    #[error("trace not found: {0}")]
    TraceNotFound(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
