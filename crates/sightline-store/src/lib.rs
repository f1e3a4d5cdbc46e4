//! # sightline-store
//!
//! Durable trace storage on pooled `SQLite`:
//!
//! - [`TraceDatabase`]: migrations, the finished-trace write path and the
//!   history query API
//! - [`repositories`]: stateless per-table SQL
//! - [`RetentionManager`]: rule-driven archiving and deletion with a
//!   scheduler thread

#![deny(unsafe_code)]

pub mod archive;
pub mod connection;
pub mod database;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod retention;
pub mod row_helpers;

pub use archive::{ArchiveFile, ArchivedTrace, read_archive};
pub use database::{DatabaseStats, TraceDatabase};
pub use errors::{Result, StoreError};
pub use repositories::{MetricSample, StoredMetric, TraceFilter};
pub use retention::{
    ARCHIVE_JOB, CLEANUP_JOB, CleanupJob, CleanupResult, RetentionManager, RetentionStatus,
    SchedulerHandle,
};
