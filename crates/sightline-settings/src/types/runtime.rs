use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Trace store configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `SQLite` database file.
    pub db_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Events written per insert batch.
    pub event_batch_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "data/traces.db".to_string(),
            pool_size: 4,
            busy_timeout_ms: 5000,
            event_batch_size: 100,
        }
    }
}

/// Trace logger configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerSettings {
    /// In-memory traces older than this are purged by `cleanup_old_traces`.
    pub max_trace_age_hours: u64,
    /// How long a memory/CPU snapshot is reused.
    pub resource_probe_interval_ms: u64,
    /// Finished traces waiting for the persistence worker.
    pub persist_queue_capacity: usize,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            max_trace_age_hours: 24,
            resource_probe_interval_ms: 1000,
            persist_queue_capacity: 1024,
        }
    }
}
