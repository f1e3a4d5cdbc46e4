//! [`TraceDatabase`]: the pooled, migrated trace store.
//!
//! Owns the connection pool and exposes the write path used by the tracer
//! (`store_finished`), the read API used by the CLI and other consumers, and
//! the maintenance hooks used by retention.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::Value;
use sightline_core::{TraceEvent, TraceId, TraceSession};
use sightline_settings::StoreSettings;
use tracing::{debug, info, instrument};

use crate::connection::{self, ConnectionConfig, ConnectionPool};
use crate::errors::Result;
use crate::migrations::run_migrations;
use crate::repositories::{
    AnalyticsCacheRepo, EventRepo, MetricRepo, MetricSample, StoredMetric, TraceFilter, TraceRepo,
};
use crate::row_helpers::days_before;

/// Row counts and bounds reported by [`TraceDatabase::get_database_stats`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DatabaseStats {
    /// Session rows.
    pub trace_count: u64,
    /// Event rows.
    pub event_count: u64,
    /// Metric sample rows.
    pub metric_count: u64,
    /// Sessions per status.
    pub traces_by_status: Vec<(String, u64)>,
    /// Earliest session start.
    pub oldest_trace: Option<DateTime<Utc>>,
    /// Latest session start.
    pub newest_trace: Option<DateTime<Utc>>,
    /// Size of the main database file, when file-backed.
    pub file_size_bytes: Option<u64>,
}

/// Pooled `SQLite` trace store.
#[derive(Clone)]
pub struct TraceDatabase {
    pool: ConnectionPool,
    path: Option<PathBuf>,
    event_batch_size: usize,
}

impl std::fmt::Debug for TraceDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceDatabase")
            .field("path", &self.path)
            .field("event_batch_size", &self.event_batch_size)
            .finish_non_exhaustive()
    }
}

impl TraceDatabase {
    /// Open the database named by `settings.db_path`, creating it if needed.
    pub fn open(settings: &StoreSettings) -> Result<Self> {
        Self::open_path(Path::new(&settings.db_path), settings)
    }

    /// Open a database file with the pool settings from `settings`.
    pub fn open_path(path: &Path, settings: &StoreSettings) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let pool = connection::new_file(path, &ConnectionConfig::from(settings))?;
        let db = Self {
            pool,
            path: Some(path.to_path_buf()),
            event_batch_size: settings.event_batch_size.max(1),
        };
        let applied = db.with_conn(run_migrations)?;
        info!(path = %path.display(), applied, "trace database ready");
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        let db = Self {
            pool,
            path: None,
            event_batch_size: StoreSettings::default().event_batch_size,
        };
        let _ = db.with_conn(run_migrations)?;
        Ok(db)
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with a pooled connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.pool.get()?;
        f(&conn)
    }

    /// Run `f` inside a transaction, committing when it returns `Ok`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── writes ──────────────────────────────────────────────────────────────

    /// Insert or update a session.
    #[instrument(skip(self, session), fields(trace_id = %session.trace_id))]
    pub fn store_trace(&self, session: &TraceSession) -> Result<()> {
        self.with_conn(|conn| TraceRepo::upsert(conn, session))
    }

    /// Insert or replace events, one transaction per batch.
    #[instrument(skip(self, events), fields(trace_id = %trace_id, count = events.len()))]
    pub fn store_events(&self, trace_id: &TraceId, events: &[TraceEvent]) -> Result<usize> {
        let mut written = 0;
        for batch in events.chunks(self.event_batch_size) {
            written += self.with_transaction(|tx| EventRepo::insert_all(tx, batch))?;
            debug!(batch = batch.len(), "event batch written");
        }
        Ok(written)
    }

    /// Persist a finished trace: the session row, then its events.
    pub fn store_finished(&self, session: &TraceSession, events: &[TraceEvent]) -> Result<()> {
        self.store_trace(session)?;
        let _ = self.store_events(&session.trace_id, events)?;
        Ok(())
    }

    /// Append metric samples, optionally attached to a stored trace.
    pub fn store_metrics(&self, trace_id: Option<&TraceId>, samples: &[MetricSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        self.with_transaction(|tx| MetricRepo::insert_all(tx, trace_id, samples))
    }

    /// Cache an analytics result.
    pub fn cache_put(&self, key: &str, payload: &Value, ttl: Option<Duration>) -> Result<()> {
        self.with_conn(|conn| AnalyticsCacheRepo::put(conn, key, payload, ttl))
    }

    // ── reads ───────────────────────────────────────────────────────────────

    /// One session.
    pub fn get_trace(&self, trace_id: &str) -> Result<Option<TraceSession>> {
        self.with_conn(|conn| TraceRepo::get(conn, trace_id))
    }

    /// Filtered session history, newest first.
    pub fn get_trace_history(
        &self,
        limit: usize,
        offset: usize,
        filter: &TraceFilter,
    ) -> Result<Vec<TraceSession>> {
        self.with_conn(|conn| TraceRepo::list(conn, filter, limit, offset))
    }

    /// A page of one trace's events in sequence order.
    pub fn get_trace_events(&self, trace_id: &str, limit: usize, offset: usize) -> Result<Vec<TraceEvent>> {
        self.with_conn(|conn| EventRepo::page_for_trace(conn, trace_id, limit, offset))
    }

    /// A page of sessions started within `[start, end]`, oldest first.
    pub fn get_traces_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TraceSession>> {
        self.with_conn(|conn| TraceRepo::by_date_range(conn, start, end, limit, offset))
    }

    /// Metric samples of one trace.
    pub fn get_trace_metrics(&self, trace_id: &str) -> Result<Vec<StoredMetric>> {
        self.with_conn(|conn| MetricRepo::for_trace(conn, trace_id))
    }

    /// A cached analytics result that has not expired.
    pub fn cache_get(&self, key: &str) -> Result<Option<Value>> {
        self.with_conn(|conn| AnalyticsCacheRepo::get(conn, key, Utc::now()))
    }

    /// Row counts, time bounds and file size.
    pub fn get_database_stats(&self) -> Result<DatabaseStats> {
        let mut stats = self.with_conn(|conn| {
            let (oldest_trace, newest_trace) = TraceRepo::time_span(conn)?;
            Ok(DatabaseStats {
                trace_count: TraceRepo::count(conn)?,
                event_count: EventRepo::count(conn)?,
                metric_count: MetricRepo::count(conn)?,
                traces_by_status: TraceRepo::count_by_status(conn)?,
                oldest_trace,
                newest_trace,
                file_size_bytes: None,
            })
        })?;
        stats.file_size_bytes = self.file_size();
        Ok(stats)
    }

    // ── maintenance ─────────────────────────────────────────────────────────

    /// Delete sessions (and their events) started more than `days` ago.
    #[instrument(skip(self))]
    pub fn cleanup_old_traces(&self, days: i64) -> Result<usize> {
        let Some(cutoff) = days_before(Utc::now(), days) else {
            return Ok(0);
        };
        let deleted = self.with_conn(|conn| TraceRepo::delete_before(conn, cutoff))?;
        info!(deleted, "old traces removed");
        Ok(deleted)
    }

    /// Reclaim free pages.
    pub fn vacuum(&self) -> Result<()> {
        self.with_conn(|conn| Ok(conn.execute_batch("VACUUM")?))
    }

    /// Bytes currently used by database pages.
    pub fn used_bytes(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let bytes: i64 = conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(bytes).unwrap_or(0))
        })
    }

    /// Write a consistent copy of the database to `dest`.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let target = dest.to_string_lossy().into_owned();
        self.with_conn(|conn| {
            let _ = conn.execute("VACUUM INTO ?1", params![target])?;
            Ok(())
        })?;
        info!("database backup written");
        Ok(())
    }

    fn file_size(&self) -> Option<u64> {
        self.path.as_ref().and_then(|p| fs::metadata(p).ok()).map(|m| m.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sightline_core::{EventId, EventType, JsonMap, Severity, TraceStatus};

    fn finished_trace(events: u64, days_ago: i64) -> (TraceSession, Vec<TraceEvent>) {
        let mut session = TraceSession::new("plan a trip", Some("alice".into()), None);
        session.start_time = Utc::now() - Duration::days(days_ago);
        session.status = TraceStatus::Completed;
        session.success = Some(true);
        session.event_count = events;
        let events = (0..events)
            .map(|seq| TraceEvent {
                event_id: EventId::new(),
                trace_id: session.trace_id.clone(),
                timestamp: session.start_time + Duration::milliseconds(i64::try_from(seq).unwrap()),
                source_module: "Planner".into(),
                event_type: EventType::Decision,
                severity: Severity::Info,
                message: format!("step {seq}"),
                duration_ms: None,
                parent_event_id: None,
                payload: JsonMap::new(),
                metadata: JsonMap::new(),
                sequence_number: seq,
            })
            .collect();
        (session, events)
    }

    #[test]
    fn store_finished_round_trip_in_memory() {
        let db = TraceDatabase::open_in_memory().unwrap();
        let (session, events) = finished_trace(7, 0);
        db.store_finished(&session, &events).unwrap();

        let back = db.get_trace(session.trace_id.as_str()).unwrap().unwrap();
        assert_eq!(back.event_count, 7);
        let stored = db.get_trace_events(session.trace_id.as_str(), 100, 0).unwrap();
        let seqs: Vec<u64> = stored.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
        assert!(stored.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn trace_events_page_in_sequence_order() {
        let db = TraceDatabase::open_in_memory().unwrap();
        let (session, events) = finished_trace(5, 0);
        db.store_finished(&session, &events).unwrap();
        let id = session.trace_id.as_str();

        let pages: Vec<Vec<u64>> = [0, 2, 4, 6]
            .into_iter()
            .map(|offset| {
                db.get_trace_events(id, 2, offset).unwrap().iter().map(|e| e.sequence_number).collect()
            })
            .collect();
        assert_eq!(pages, [vec![0, 1], vec![2, 3], vec![4], vec![]]);
    }

    #[test]
    fn events_are_written_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreSettings { event_batch_size: 3, ..StoreSettings::default() };
        let db = TraceDatabase::open_path(&dir.path().join("t.db"), &settings).unwrap();
        let (session, events) = finished_trace(10, 0);
        db.store_trace(&session).unwrap();
        assert_eq!(db.store_events(&session.trace_id, &events).unwrap(), 10);
        assert_eq!(db.get_database_stats().unwrap().event_count, 10);
    }

    #[test]
    fn store_is_idempotent() {
        let db = TraceDatabase::open_in_memory().unwrap();
        let (session, events) = finished_trace(3, 0);
        db.store_finished(&session, &events).unwrap();
        db.store_finished(&session, &events).unwrap();
        let stats = db.get_database_stats().unwrap();
        assert_eq!(stats.trace_count, 1);
        assert_eq!(stats.event_count, 3);
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("traces.db");
        let settings = StoreSettings::default();
        let (session, events) = finished_trace(2, 0);
        {
            let db = TraceDatabase::open_path(&path, &settings).unwrap();
            db.store_finished(&session, &events).unwrap();
        }
        let db = TraceDatabase::open_path(&path, &settings).unwrap();
        assert_eq!(db.get_trace_events(session.trace_id.as_str(), 100, 0).unwrap().len(), 2);
        assert!(db.get_database_stats().unwrap().file_size_bytes.unwrap() > 0);
    }

    #[test]
    fn history_and_date_range_queries() {
        let db = TraceDatabase::open_in_memory().unwrap();
        for days in [0, 2, 9] {
            let (session, events) = finished_trace(1, days);
            db.store_finished(&session, &events).unwrap();
        }
        let (start, end) = (Utc::now() - Duration::days(3), Utc::now());
        let recent = db.get_traces_by_date_range(start, end, 10, 0).unwrap();
        assert_eq!(recent.len(), 2);
        let older = db.get_traces_by_date_range(start, end, 1, 0).unwrap();
        let newer = db.get_traces_by_date_range(start, end, 1, 1).unwrap();
        assert!(older[0].start_time < newer[0].start_time);
        assert!(db.get_traces_by_date_range(start, end, 1, 2).unwrap().is_empty());
        let page = db.get_trace_history(2, 0, &TraceFilter::default()).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].start_time > page[1].start_time);
    }

    #[test]
    fn cleanup_old_traces_removes_events_too() {
        let db = TraceDatabase::open_in_memory().unwrap();
        let (old, old_events) = finished_trace(4, 10);
        let (new, new_events) = finished_trace(2, 1);
        db.store_finished(&old, &old_events).unwrap();
        db.store_finished(&new, &new_events).unwrap();

        assert_eq!(db.cleanup_old_traces(7).unwrap(), 1);
        let stats = db.get_database_stats().unwrap();
        assert_eq!(stats.trace_count, 1);
        assert_eq!(stats.event_count, 2);
        db.vacuum().unwrap();
    }

    #[test]
    fn metrics_attach_to_trace() {
        let db = TraceDatabase::open_in_memory().unwrap();
        let (session, events) = finished_trace(1, 0);
        db.store_finished(&session, &events).unwrap();
        let written = db
            .store_metrics(Some(&session.trace_id), &[MetricSample::now("response_time", 0.4)])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(db.get_trace_metrics(session.trace_id.as_str()).unwrap().len(), 1);
        assert_eq!(db.store_metrics(None, &[]).unwrap(), 0);
    }

    #[test]
    fn analytics_cache_round_trip() {
        let db = TraceDatabase::open_in_memory().unwrap();
        db.cache_put("stats", &json!({"n": 1}), Some(Duration::minutes(5))).unwrap();
        assert_eq!(db.cache_get("stats").unwrap().unwrap()["n"], 1);
        assert!(db.cache_get("other").unwrap().is_none());
    }

    #[test]
    fn backup_copies_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = TraceDatabase::open_path(&dir.path().join("live.db"), &StoreSettings::default()).unwrap();
        let (session, events) = finished_trace(3, 0);
        db.store_finished(&session, &events).unwrap();

        let copy_path = dir.path().join("backups").join("copy.db");
        db.backup_to(&copy_path).unwrap();
        let copy = TraceDatabase::open_path(&copy_path, &StoreSettings::default()).unwrap();
        assert_eq!(copy.get_database_stats().unwrap().event_count, 3);
    }
}
