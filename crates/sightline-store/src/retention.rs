//! [`RetentionManager`]: rule-driven cleanup and archiving of stored data.
//!
//! Each [`RetentionRule`] governs one [`DataCategory`]. A cleanup run walks
//! every rule, archiving rows past the archive cutoff and deleting rows past
//! the delete cutoff; a failing rule is recorded in the run's result and the
//! remaining rules still run. Two jobs exist: `daily_cleanup` (archive and
//! delete) and `weekly_archive` (archive only). A scheduler thread runs them
//! when due.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use serde::Serialize;
use sightline_core::TraceId;
use sightline_settings::{DataCategory, RetentionPolicy, RetentionRule, RetentionSettings};
use tracing::{debug, error, info, warn};

use crate::archive::{ArchivedTrace, write_archive};
use crate::database::TraceDatabase;
use crate::errors::Result;
use crate::repositories::{AnalyticsCacheRepo, EventRepo, MetricRepo, TraceRepo};
use crate::row_helpers::{days_before, to_epoch};

/// Job id of the archive-and-delete job.
pub const CLEANUP_JOB: &str = "daily_cleanup";
/// Job id of the archive-only job.
pub const ARCHIVE_JOB: &str = "weekly_archive";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Cleanup,
    ArchiveOnly,
}

/// A scheduled retention job.
#[derive(Clone, Debug, Serialize)]
pub struct CleanupJob {
    /// Stable id.
    pub job_id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Hours between runs.
    pub interval_hours: u64,
    /// Whether the scheduler runs it.
    pub enabled: bool,
    /// Start of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// When the scheduler runs it next.
    pub next_run: DateTime<Utc>,
    #[serde(skip)]
    mode: Mode,
}

impl CleanupJob {
    fn new(job_id: &'static str, name: &'static str, interval_hours: u64, enabled: bool, mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            name,
            interval_hours,
            enabled,
            last_run: None,
            next_run: after_hours(now, interval_hours),
            mode,
        }
    }
}

fn after_hours(from: DateTime<Utc>, hours: u64) -> DateTime<Utc> {
    i64::try_from(hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Outcome of one job run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CleanupResult {
    /// Job that ran.
    pub job_id: String,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
    /// Records examined.
    pub records_processed: u64,
    /// Records deleted (rows and files).
    pub records_deleted: u64,
    /// Records written to archives.
    pub records_archived: u64,
    /// Bytes reclaimed from the database and deleted files.
    pub bytes_freed: u64,
    /// One entry per failed rule or file.
    pub errors: Vec<String>,
    /// No errors occurred.
    pub success: bool,
}

impl CleanupResult {
    fn started(job_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            started_at,
            finished_at: started_at,
            records_processed: 0,
            records_deleted: 0,
            records_archived: 0,
            bytes_freed: 0,
            errors: Vec::new(),
            success: false,
        }
    }

    fn absorb(&mut self, outcome: RuleOutcome) {
        self.records_processed += outcome.processed;
        self.records_deleted += outcome.deleted;
        self.records_archived += outcome.archived;
        self.bytes_freed += outcome.bytes_freed;
        self.errors.extend(outcome.errors);
    }
}

#[derive(Debug, Default)]
struct RuleOutcome {
    processed: u64,
    deleted: u64,
    archived: u64,
    bytes_freed: u64,
    errors: Vec<String>,
}

/// Snapshot returned by [`RetentionManager::get_retention_status`].
#[derive(Clone, Debug, Serialize)]
pub struct RetentionStatus {
    /// Configured rules.
    pub rules: Vec<RetentionRule>,
    /// Jobs and their schedule.
    pub jobs: Vec<CleanupJob>,
    /// Results kept in history.
    pub history_len: usize,
    /// Sum over the kept history.
    pub total_records_deleted: u64,
    /// Sum over the kept history.
    pub total_records_archived: u64,
    /// Sum over the kept history.
    pub total_bytes_freed: u64,
    /// Most recent run.
    pub last_result: Option<CleanupResult>,
}

/// Applies retention rules to a [`TraceDatabase`] and the export directory.
pub struct RetentionManager {
    db: TraceDatabase,
    rules: Vec<RetentionRule>,
    archive_dir: PathBuf,
    backup_dir: PathBuf,
    export_dir: PathBuf,
    backup_before_cleanup: bool,
    max_history: usize,
    jobs: Mutex<Vec<CleanupJob>>,
    history: Mutex<VecDeque<CleanupResult>>,
    running: Mutex<()>,
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("rules", &self.rules.len())
            .field("archive_dir", &self.archive_dir)
            .finish_non_exhaustive()
    }
}

impl RetentionManager {
    /// Build a manager over `db`.
    pub fn new(db: TraceDatabase, settings: &RetentionSettings) -> Self {
        let jobs = vec![
            CleanupJob::new(
                CLEANUP_JOB,
                "Daily cleanup",
                settings.cleanup_interval_hours,
                settings.enable_auto_cleanup,
                Mode::Cleanup,
            ),
            CleanupJob::new(
                ARCHIVE_JOB,
                "Weekly archive",
                settings.archive_interval_hours,
                settings.enable_auto_cleanup,
                Mode::ArchiveOnly,
            ),
        ];
        Self {
            db,
            rules: settings.rules.clone(),
            archive_dir: PathBuf::from(&settings.archive_dir),
            backup_dir: PathBuf::from(&settings.backup_dir),
            export_dir: PathBuf::from(&settings.export_dir),
            backup_before_cleanup: settings.backup_before_cleanup,
            max_history: settings.max_history.max(1),
            jobs: Mutex::new(jobs),
            history: Mutex::new(VecDeque::new()),
            running: Mutex::new(()),
        }
    }

    /// Configured rules.
    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    /// Archive and delete per every rule.
    pub fn run_cleanup(&self) -> CleanupResult {
        self.run(CLEANUP_JOB, Mode::Cleanup)
    }

    /// Archive only; nothing is deleted.
    pub fn run_archive(&self) -> CleanupResult {
        self.run(ARCHIVE_JOB, Mode::ArchiveOnly)
    }

    /// Run every enabled job whose `next_run` is at or before `now`.
    pub fn run_due_jobs(&self, now: DateTime<Utc>) -> Vec<CleanupResult> {
        let due: Vec<(&'static str, Mode)> = self
            .jobs
            .lock()
            .iter()
            .filter(|job| job.enabled && job.next_run <= now)
            .map(|job| (job.job_id, job.mode))
            .collect();
        due.into_iter().map(|(id, mode)| self.run(id, mode)).collect()
    }

    /// Kept results, oldest first.
    pub fn history(&self) -> Vec<CleanupResult> {
        self.history.lock().iter().cloned().collect()
    }

    /// Rules, job schedule and totals over the kept history.
    pub fn get_retention_status(&self) -> RetentionStatus {
        let history = self.history.lock();
        RetentionStatus {
            rules: self.rules.clone(),
            jobs: self.jobs.lock().clone(),
            history_len: history.len(),
            total_records_deleted: history.iter().map(|r| r.records_deleted).sum(),
            total_records_archived: history.iter().map(|r| r.records_archived).sum(),
            total_bytes_freed: history.iter().map(|r| r.bytes_freed).sum(),
            last_result: history.back().cloned(),
        }
    }

    /// Start the scheduler thread, checking for due jobs every `tick`.
    pub fn start_scheduler(self: &Arc<Self>, tick: std::time::Duration) -> Result<SchedulerHandle> {
        let (shutdown, rx) = bounded::<()>(1);
        let manager = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name("sightline-retention".into())
            .spawn(move || manager.scheduler_loop(&rx, tick))?;
        info!(tick_secs = tick.as_secs(), "retention scheduler started");
        Ok(SchedulerHandle { shutdown, thread: Some(thread) })
    }

    fn scheduler_loop(&self, shutdown: &Receiver<()>, tick: std::time::Duration) {
        loop {
            match shutdown.recv_timeout(tick) {
                Err(RecvTimeoutError::Timeout) => {
                    for result in self.run_due_jobs(Utc::now()) {
                        if !result.success {
                            error!(job = %result.job_id, errors = ?result.errors, "scheduled retention job had errors");
                        }
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("retention scheduler stopped");
    }

    // ── job execution ───────────────────────────────────────────────────────

    fn run(&self, job_id: &'static str, mode: Mode) -> CleanupResult {
        let _running = self.running.lock();
        let started_at = Utc::now();
        info!(job = job_id, "retention job started");
        let mut result = CleanupResult::started(job_id, started_at);

        if mode == Mode::Cleanup && self.backup_before_cleanup {
            self.backup(job_id, started_at);
        }
        let size_before = self.db.used_bytes().ok();

        for rule in &self.rules {
            match self.apply_rule(rule, started_at, mode) {
                Ok(outcome) => result.absorb(outcome),
                Err(e) => {
                    warn!(category = %rule.category, error = %e, "retention rule failed");
                    result.errors.push(format!("{}: {e}", rule.category));
                }
            }
        }

        if mode == Mode::Cleanup && result.records_deleted > 0 {
            if let Err(e) = self.db.vacuum() {
                warn!(error = %e, "vacuum after cleanup failed");
                result.errors.push(format!("vacuum: {e}"));
            }
        }
        if let (Some(before), Ok(after)) = (size_before, self.db.used_bytes()) {
            result.bytes_freed += before.saturating_sub(after);
        }

        result.finished_at = Utc::now();
        result.success = result.errors.is_empty();
        info!(
            job = job_id,
            deleted = result.records_deleted,
            archived = result.records_archived,
            bytes_freed = result.bytes_freed,
            errors = result.errors.len(),
            "retention job finished"
        );

        if let Some(job) = self.jobs.lock().iter_mut().find(|j| j.job_id == job_id) {
            job.last_run = Some(started_at);
            job.next_run = after_hours(started_at, job.interval_hours);
        }
        let mut history = self.history.lock();
        history.push_back(result.clone());
        while history.len() > self.max_history {
            let _ = history.pop_front();
        }
        result
    }

    fn backup(&self, job_id: &str, now: DateTime<Utc>) {
        if self.db.path().is_none() {
            return;
        }
        let dest = self
            .backup_dir
            .join(format!("backup_{job_id}_{}.db", now.format("%Y%m%d_%H%M%S")));
        if let Err(e) = self.db.backup_to(&dest) {
            warn!(error = %e, dest = %dest.display(), "pre-cleanup backup failed");
        }
    }

    fn apply_rule(&self, rule: &RetentionRule, now: DateTime<Utc>, mode: Mode) -> Result<RuleOutcome> {
        let delete = delete_cutoff(rule, now);
        match rule.category {
            DataCategory::TraceEvents => self.apply_trace_rule(rule, delete, now, mode),
            DataCategory::PerformanceMetrics if mode == Mode::Cleanup => {
                self.apply_metric_rule(rule, delete, now)
            }
            DataCategory::AnalyticsCache if mode == Mode::Cleanup => {
                let Some(cutoff) = delete else { return Ok(RuleOutcome::default()) };
                let now = to_epoch(now);
                let deleted = self.db.with_conn(|conn| {
                    let stale = AnalyticsCacheRepo::count_stale(conn, cutoff, now)?;
                    let deleted = AnalyticsCacheRepo::delete_stale(conn, cutoff, now)?;
                    debug!(stale, deleted, "analytics cache pruned");
                    Ok(deleted as u64)
                })?;
                Ok(RuleOutcome { processed: deleted, deleted, ..RuleOutcome::default() })
            }
            DataCategory::ExportedData if mode == Mode::Cleanup => {
                Ok(delete.map(|cutoff| prune_files(&self.export_dir, cutoff)).unwrap_or_default())
            }
            DataCategory::ErrorLogs | DataCategory::SecurityAudit => {
                debug!(category = %rule.category, "no stored data for category");
                Ok(RuleOutcome::default())
            }
            _ => Ok(RuleOutcome::default()),
        }
    }

    fn apply_trace_rule(
        &self,
        rule: &RetentionRule,
        delete: Option<f64>,
        now: DateTime<Utc>,
        mode: Mode,
    ) -> Result<RuleOutcome> {
        let mut outcome = RuleOutcome::default();
        if let Some(cutoff) = archive_cutoff(rule, delete, now) {
            outcome.archived += self.archive_traces(cutoff, rule.compress, now)?;
        }
        if mode == Mode::ArchiveOnly {
            return Ok(outcome);
        }
        if let Some(cutoff) = delete {
            let removed = self.db.with_transaction(|tx| {
                let events = EventRepo::count_for_traces_before(tx, cutoff)?;
                let traces = TraceRepo::delete_before(tx, cutoff)? as u64;
                Ok(traces + events)
            })?;
            outcome.deleted += removed;
            outcome.processed += removed;
        }
        Ok(outcome)
    }

    fn archive_traces(&self, cutoff: f64, compress: bool, now: DateTime<Utc>) -> Result<u64> {
        let records = self.db.with_conn(|conn| {
            TraceRepo::unarchived_before(conn, cutoff)?
                .into_iter()
                .map(|trace| {
                    let events = EventRepo::for_trace(conn, trace.trace_id.as_str())?;
                    Ok(ArchivedTrace { trace, events })
                })
                .collect::<Result<Vec<_>>>()
        })?;
        if records.is_empty() {
            return Ok(0);
        }

        let file = write_archive(&self.archive_dir, "traces_archive", &records, compress, now)?;
        let ids: Vec<TraceId> = records.iter().map(|r| r.trace.trace_id.clone()).collect();
        let _ = self.db.with_transaction(|tx| TraceRepo::mark_archived(tx, &ids, now))?;
        info!(path = %file.path.display(), traces = file.records, bytes = file.bytes, "traces archived");
        Ok(file.records as u64)
    }

    fn apply_metric_rule(
        &self,
        rule: &RetentionRule,
        delete: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome> {
        let Some(cutoff) = delete else { return Ok(RuleOutcome::default()) };
        let mut outcome = RuleOutcome::default();

        // Samples carry no archive stamp, so they are archived on their way out.
        if rule.archive_after_days.is_some() || rule.policy == RetentionPolicy::Archive {
            let rows = self.db.with_conn(|conn| MetricRepo::before(conn, cutoff))?;
            if !rows.is_empty() {
                let file = write_archive(&self.archive_dir, "metrics_archive", &rows, rule.compress, now)?;
                outcome.archived += file.records as u64;
            }
        }
        let deleted = self.db.with_conn(|conn| MetricRepo::delete_before(conn, cutoff))? as u64;
        outcome.deleted += deleted;
        outcome.processed += deleted;
        Ok(outcome)
    }
}

fn delete_cutoff(rule: &RetentionRule, now: DateTime<Utc>) -> Option<f64> {
    if !rule.deletes() {
        return None;
    }
    if rule.policy == RetentionPolicy::Immediate {
        return Some(f64::MAX);
    }
    days_before(now, rule.retention_days)
}

fn archive_cutoff(rule: &RetentionRule, delete: Option<f64>, now: DateTime<Utc>) -> Option<f64> {
    match rule.archive_after_days {
        Some(days) => days_before(now, days.max(0)),
        None if rule.policy == RetentionPolicy::Archive => delete,
        None => None,
    }
}

fn prune_files(dir: &Path, cutoff: f64) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return outcome,
        Err(e) => {
            outcome.errors.push(format!("{}: {e}", dir.display()));
            return outcome;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                outcome.errors.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        outcome.processed += 1;
        let modified = meta.modified().map(|t| to_epoch(DateTime::<Utc>::from(t)));
        if modified.is_ok_and(|m| m < cutoff) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    outcome.deleted += 1;
                    outcome.bytes_freed += meta.len();
                }
                Err(e) => outcome.errors.push(format!("{}: {e}", path.display())),
            }
        }
    }
    outcome
}

/// Stops the scheduler thread when shut down or dropped.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("retention scheduler panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_archive;
    use crate::repositories::MetricSample;
    use chrono::Duration;
    use sightline_core::{EventId, EventType, JsonMap, Severity, TraceEvent, TraceSession, TraceStatus};
    use sightline_settings::StoreSettings;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: TraceDatabase,
        settings: RetentionSettings,
    }

    fn fixture(rules: Vec<RetentionRule>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = TraceDatabase::open_path(&dir.path().join("traces.db"), &StoreSettings::default()).unwrap();
        let settings = RetentionSettings {
            archive_dir: dir.path().join("archives").to_string_lossy().into_owned(),
            backup_dir: dir.path().join("backups").to_string_lossy().into_owned(),
            export_dir: dir.path().join("exports").to_string_lossy().into_owned(),
            backup_before_cleanup: false,
            rules,
            ..RetentionSettings::default()
        };
        Fixture { _dir: dir, db, settings }
    }

    fn rule(category: DataCategory, policy: RetentionPolicy, days: i64, archive: Option<i64>) -> RetentionRule {
        RetentionRule::new(category, policy, days, archive, true)
    }

    fn store_trace(db: &TraceDatabase, days_ago: i64, events: u64) -> TraceSession {
        let mut session = TraceSession::new(format!("q{days_ago}"), None, None);
        session.start_time = Utc::now() - Duration::days(days_ago) - Duration::minutes(1);
        session.status = TraceStatus::Completed;
        session.event_count = events;
        let events: Vec<_> = (0..events)
            .map(|seq| TraceEvent {
                event_id: EventId::new(),
                trace_id: session.trace_id.clone(),
                timestamp: session.start_time,
                source_module: "Planner".into(),
                event_type: EventType::Decision,
                severity: Severity::Info,
                message: "m".into(),
                duration_ms: None,
                parent_event_id: None,
                payload: JsonMap::new(),
                metadata: JsonMap::new(),
                sequence_number: seq,
            })
            .collect();
        db.store_finished(&session, &events).unwrap();
        session
    }

    // ── delete ──

    #[test]
    fn seven_day_rule_deletes_exactly_the_old_traces() {
        let fx = fixture(vec![rule(DataCategory::TraceEvents, RetentionPolicy::ShortTerm, 7, None)]);
        let old_a = store_trace(&fx.db, 8, 3);
        let old_b = store_trace(&fx.db, 30, 2);
        let fresh = store_trace(&fx.db, 6, 4);
        let _ = store_trace(&fx.db, 0, 1);
        let before = fx.db.get_database_stats().unwrap();
        assert_eq!((before.trace_count, before.event_count), (4, 10));

        let manager = RetentionManager::new(fx.db.clone(), &fx.settings);
        let result = manager.run_cleanup();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.records_deleted, 2 + 3 + 2);
        let after = fx.db.get_database_stats().unwrap();
        assert_eq!((after.trace_count, after.event_count), (2, 5));
        assert!(fx.db.get_trace(old_a.trace_id.as_str()).unwrap().is_none());
        assert!(fx.db.get_trace(old_b.trace_id.as_str()).unwrap().is_none());
        assert_eq!(fx.db.get_trace_events(fresh.trace_id.as_str(), 100, 0).unwrap().len(), 4);
    }

    #[test]
    fn permanent_and_non_positive_rules_never_delete() {
        let fx = fixture(vec![
            rule(DataCategory::TraceEvents, RetentionPolicy::Permanent, 1, None),
            rule(DataCategory::PerformanceMetrics, RetentionPolicy::LongTerm, 0, None),
        ]);
        let _ = store_trace(&fx.db, 400, 2);
        let mut sample = MetricSample::now("response_time", 1.0);
        sample.timestamp = Utc::now() - Duration::days(400);
        let _ = fx.db.store_metrics(None, &[sample]).unwrap();

        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert_eq!(result.records_deleted, 0);
        let stats = fx.db.get_database_stats().unwrap();
        assert_eq!((stats.trace_count, stats.metric_count), (1, 1));
    }

    #[test]
    fn immediate_policy_deletes_everything() {
        let fx = fixture(vec![rule(DataCategory::TraceEvents, RetentionPolicy::Immediate, 0, None)]);
        let _ = store_trace(&fx.db, 0, 2);
        let _ = store_trace(&fx.db, 3, 1);
        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert_eq!(result.records_deleted, 2 + 3);
        assert_eq!(fx.db.get_database_stats().unwrap().trace_count, 0);
    }

    // ── archive ──

    #[test]
    fn archive_writes_gzip_snapshot_once() {
        let fx = fixture(vec![rule(DataCategory::TraceEvents, RetentionPolicy::MediumTerm, 30, Some(7))]);
        let archived = store_trace(&fx.db, 10, 3);
        let _ = store_trace(&fx.db, 1, 1);
        let manager = RetentionManager::new(fx.db.clone(), &fx.settings);

        let first = manager.run_archive();
        assert_eq!(first.records_archived, 1);
        assert_eq!(first.records_deleted, 0);
        let second = manager.run_archive();
        assert_eq!(second.records_archived, 0);

        let files: Vec<_> = fs::read_dir(&fx.settings.archive_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("traces_archive_") && name.ends_with(".json.gz"));

        let back: Vec<ArchivedTrace> = read_archive(&files[0]).unwrap();
        assert_eq!(back[0].trace.trace_id, archived.trace_id);
        assert_eq!(back[0].events.len(), 3);
        // Archiving alone keeps the rows.
        assert_eq!(fx.db.get_database_stats().unwrap().trace_count, 2);
    }

    #[test]
    fn archive_policy_archives_before_deleting() {
        let fx = fixture(vec![rule(DataCategory::TraceEvents, RetentionPolicy::Archive, 7, None)]);
        let _ = store_trace(&fx.db, 9, 2);
        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert_eq!(result.records_archived, 1);
        assert_eq!(result.records_deleted, 3);
    }

    #[test]
    fn old_metrics_are_archived_then_deleted() {
        let fx = fixture(vec![rule(DataCategory::PerformanceMetrics, RetentionPolicy::LongTerm, 90, Some(30))]);
        let mut old = MetricSample::now("error_rate", 0.2);
        old.timestamp = Utc::now() - Duration::days(91);
        let _ = fx.db.store_metrics(None, &[old, MetricSample::now("error_rate", 0.0)]).unwrap();

        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert_eq!((result.records_archived, result.records_deleted), (1, 1));
        assert_eq!(fx.db.get_database_stats().unwrap().metric_count, 1);
    }

    // ── files and cache ──

    #[test]
    fn exported_files_older_than_cutoff_are_removed() {
        let fx = fixture(vec![rule(DataCategory::ExportedData, RetentionPolicy::Immediate, 0, None)]);
        fs::create_dir_all(&fx.settings.export_dir).unwrap();
        let export = Path::new(&fx.settings.export_dir).join("export.json");
        fs::write(&export, b"[1,2,3]").unwrap();

        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert_eq!(result.records_deleted, 1);
        assert!(result.bytes_freed >= 7);
        assert!(!export.exists());
    }

    #[test]
    fn missing_export_dir_is_not_an_error() {
        let fx = fixture(vec![rule(DataCategory::ExportedData, RetentionPolicy::ShortTerm, 7, None)]);
        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert!(result.success);
    }

    #[test]
    fn analytics_cache_immediate_clears_entries() {
        let fx = fixture(vec![rule(DataCategory::AnalyticsCache, RetentionPolicy::Immediate, 0, None)]);
        fx.db.cache_put("stats", &serde_json::json!({}), None).unwrap();
        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert_eq!(result.records_deleted, 1);
        assert!(fx.db.cache_get("stats").unwrap().is_none());
    }

    // ── bookkeeping ──

    #[test]
    fn failing_rule_does_not_block_others() {
        let fx = fixture(vec![
            rule(DataCategory::TraceEvents, RetentionPolicy::MediumTerm, 30, Some(7)),
            rule(DataCategory::PerformanceMetrics, RetentionPolicy::Immediate, 0, None),
        ]);
        let _ = store_trace(&fx.db, 10, 1);
        let _ = fx.db.store_metrics(None, &[MetricSample::now("throughput", 1.0)]).unwrap();
        // A plain file where the archive directory should be.
        fs::write(&fx.settings.archive_dir, b"not a dir").unwrap();

        let result = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("trace_events"));
        assert_eq!(fx.db.get_database_stats().unwrap().metric_count, 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut fx = fixture(Vec::new());
        fx.settings.max_history = 2;
        let manager = RetentionManager::new(fx.db.clone(), &fx.settings);
        for _ in 0..3 {
            let _ = manager.run_cleanup();
        }
        let _ = manager.run_archive();
        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].job_id, ARCHIVE_JOB);

        let status = manager.get_retention_status();
        assert_eq!(status.history_len, 2);
        assert_eq!(status.last_result.unwrap().job_id, ARCHIVE_JOB);
        let cleanup = status.jobs.iter().find(|j| j.job_id == CLEANUP_JOB).unwrap();
        assert!(cleanup.last_run.is_some());
    }

    #[test]
    fn backup_is_written_before_cleanup() {
        let mut fx = fixture(Vec::new());
        fx.settings.backup_before_cleanup = true;
        let _ = RetentionManager::new(fx.db.clone(), &fx.settings).run_cleanup();
        let backups: Vec<_> = fs::read_dir(&fx.settings.backup_dir).unwrap().collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn due_jobs_follow_their_intervals() {
        let fx = fixture(Vec::new());
        let manager = RetentionManager::new(fx.db.clone(), &fx.settings);
        assert!(manager.run_due_jobs(Utc::now()).is_empty());

        let tomorrow = Utc::now() + Duration::hours(25);
        let ran = manager.run_due_jobs(tomorrow);
        assert_eq!(ran.len(), 1);
        assert_eq!(ran[0].job_id, CLEANUP_JOB);

        let next_week = Utc::now() + Duration::hours(24 * 8);
        let ran: Vec<_> = manager.run_due_jobs(next_week).into_iter().map(|r| r.job_id).collect();
        assert_eq!(ran, [CLEANUP_JOB, ARCHIVE_JOB]);
    }

    #[test]
    fn scheduler_stops_promptly() {
        let fx = fixture(Vec::new());
        let manager = Arc::new(RetentionManager::new(fx.db.clone(), &fx.settings));
        let handle = manager.start_scheduler(std::time::Duration::from_secs(3600)).unwrap();
        let started = std::time::Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
