//! [`BreakpointManager`]: breakpoint matching and pause/resume coordination.
//!
//! All state sits behind one mutex. Blocking happens elsewhere: every pause
//! owns a [`ResumeSlot`] (a condvar plus the eventual outcome), and
//! [`BreakpointManager::wait_for_resume`] parks on that slot with the
//! manager lock released, so `resume_trace` from another thread is never
//! held up by a waiter. A slot outlives its pause until the waiter collects
//! it, so a resume that lands before the wait starts is not lost.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::{Condvar, Mutex};
use sightline_core::condition::{Condition, EventContext};
use sightline_core::pattern::Pattern;
use sightline_core::{BreakpointId, HitId, JsonMap, TraceId};
use sightline_settings::BreakpointSettings;
use tracing::{debug, error, info, warn};

use crate::breakpoint::{
    Breakpoint, BreakpointHit, BreakpointStatistics, BreakpointStatus, NewBreakpoint,
    PausedTrace, ResolutionAction, ResumeOutcome,
};
use crate::errors::{BreakpointError, Result};
use crate::store::BreakpointStore;

/// Hits dropped at once when the history overflows.
const HIT_HISTORY_TRIM: usize = 100;

const SYSTEM: &str = "system";

/// Deadline used when a requested timeout does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).or_else(|| now.checked_add(FAR_FUTURE)).unwrap_or(now)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

struct Armed {
    record: Breakpoint,
    module: Pattern,
    event_type: Pattern,
    condition: Option<Condition>,
    outstanding: usize,
}

impl Armed {
    fn compile(record: Breakpoint) -> Result<Self> {
        let invalid = |e: &dyn std::fmt::Display| BreakpointError::Validation(e.to_string());
        let module = Pattern::new(&record.module_pattern).map_err(|e| invalid(&e))?;
        let event_type = Pattern::new(&record.event_type_pattern).map_err(|e| invalid(&e))?;
        let condition = if record.condition.trim().is_empty() {
            None
        } else {
            Some(Condition::compile(&record.condition).map_err(|e| invalid(&e))?)
        };
        Ok(Self { record, module, event_type, condition, outstanding: 0 })
    }

    fn can_match(&self, now: DateTime<Utc>) -> bool {
        self.record.enabled
            && self.record.status.is_armed()
            && !self.record.is_exhausted()
            && !self.record.is_expired_at(now)
    }

    /// Move a spent breakpoint to EXPIRED or DISABLED.
    fn retire_if_spent(&mut self, now: DateTime<Utc>) -> bool {
        if !self.record.status.is_armed() {
            return false;
        }
        if self.record.is_expired_at(now) {
            self.record.status = BreakpointStatus::Expired;
        } else if self.record.is_exhausted() {
            self.record.status = BreakpointStatus::Disabled;
        } else {
            return false;
        }
        info!(breakpoint_id = %self.record.id, status = %self.record.status, "breakpoint retired");
        true
    }

    fn filters_match(&self, ctx: &EventContext) -> bool {
        self.module.matches(&ctx.source_module) && self.event_type.matches(ctx.event_type.as_str())
    }
}

/// Rendezvous between a paused thread and whoever resolves its pause.
struct ResumeSlot {
    hit_id: HitId,
    outcome: Mutex<Option<(ResumeOutcome, Instant)>>,
    ready: Condvar,
}

impl ResumeSlot {
    fn new(hit_id: HitId) -> Self {
        Self { hit_id, outcome: Mutex::new(None), ready: Condvar::new() }
    }

    fn complete(&self, outcome: ResumeOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some((outcome, Instant::now()));
            let _ = self.ready.notify_all();
        }
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        self.outcome
            .lock()
            .as_ref()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) >= ttl)
    }
}

struct PauseEntry {
    info: PausedTrace,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    breakpoints: Vec<Armed>,
    /// Oldest first.
    paused: Vec<PauseEntry>,
    waiters: HashMap<TraceId, Arc<ResumeSlot>>,
    /// Latest match per trace not yet turned into a pause.
    unclaimed: HashMap<TraceId, (BreakpointId, HitId)>,
    hits: VecDeque<BreakpointHit>,
}

impl Inner {
    fn armed_count(&self) -> usize {
        self.breakpoints.iter().filter(|a| a.record.status.is_armed()).count()
    }

    fn find_mut(&mut self, id: &BreakpointId) -> Option<&mut Armed> {
        self.breakpoints.iter_mut().find(|a| a.record.id == *id)
    }

    fn pause_for(&self, trace_id: &TraceId) -> Option<&PauseEntry> {
        self.paused.iter().find(|p| p.info.trace_id == *trace_id)
    }

    /// Drop one outstanding hit of `id`; TRIGGERED falls back to ACTIVE at zero.
    fn release(&mut self, id: &BreakpointId) {
        if let Some(armed) = self.find_mut(id) {
            armed.outstanding = armed.outstanding.saturating_sub(1);
            if armed.outstanding == 0 && armed.record.status == BreakpointStatus::Triggered {
                armed.record.status = BreakpointStatus::Active;
            }
        }
    }

    fn record_hit(&mut self, hit: BreakpointHit, limit: usize) {
        self.hits.push_back(hit);
        if self.hits.len() > limit {
            let excess = self.hits.len() - limit;
            let drop = excess.max(HIT_HISTORY_TRIM.min(limit));
            let _ = self.hits.drain(..drop);
        }
    }

    /// End the pause of `trace_id`, stamp its hit and wake its waiter.
    fn resolve(
        &mut self,
        trace_id: &TraceId,
        action: ResolutionAction,
        resolved_by: &str,
        override_payload: Option<JsonMap>,
    ) -> bool {
        let Some(pos) = self.paused.iter().position(|p| p.info.trace_id == *trace_id) else {
            return false;
        };
        let entry = self.paused.remove(pos);
        let override_payload =
            if action == ResolutionAction::Resume { override_payload } else { None };

        if let Some(hit) = self.hits.iter_mut().rev().find(|h| h.hit_id == entry.info.hit_id) {
            hit.resolved_timestamp = Some(Utc::now());
            hit.resolution_action = Some(action);
            hit.resolved_by = Some(resolved_by.to_string());
            hit.override_payload.clone_from(&override_payload);
        }
        self.release(&entry.info.breakpoint_id);
        if let Some(slot) = self.waiters.get(trace_id) {
            if slot.hit_id == entry.info.hit_id {
                slot.complete(ResumeOutcome { action: action.into(), override_payload });
            }
        }
        info!(
            trace_id = %trace_id,
            hit_id = %entry.info.hit_id,
            action = action.as_str(),
            resolved_by,
            "pause resolved"
        );
        true
    }
}

fn condition_holds(armed: &Armed, ctx: &EventContext, limit_secs: f64) -> bool {
    let Some(condition) = &armed.condition else {
        return true;
    };
    let started = Instant::now();
    let result = condition.evaluate(ctx);
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > limit_secs {
        warn!(
            breakpoint_id = %armed.record.id,
            elapsed_secs = elapsed,
            limit_secs,
            "condition evaluation overran, treating as no match"
        );
        return false;
    }
    match result {
        Ok(matched) => matched,
        Err(e) => {
            warn!(breakpoint_id = %armed.record.id, error = %e, "condition evaluation failed");
            false
        }
    }
}

/// What a sweep changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Breakpoints moved to EXPIRED or DISABLED.
    pub retired: usize,
    /// Pauses resolved with `auto_timeout`.
    pub timed_out: usize,
    /// Uncollected resume slots dropped.
    pub purged_slots: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns breakpoints, matches events against them and parks paused traces.
pub struct BreakpointManager {
    settings: BreakpointSettings,
    store: Option<BreakpointStore>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for BreakpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakpointManager")
            .field("enabled", &self.settings.enable_breakpoints)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl BreakpointManager {
    /// Build a manager, loading saved breakpoints from `storage_path` if set.
    ///
    /// Saved breakpoints whose patterns or condition no longer compile are
    /// skipped with a warning.
    pub fn new(settings: BreakpointSettings) -> Result<Self> {
        let store = settings.storage_path.as_deref().map(BreakpointStore::new);
        let mut inner = Inner::default();
        if let Some(store) = &store {
            for mut record in store.load()? {
                if record.status == BreakpointStatus::Triggered {
                    record.status = BreakpointStatus::Active;
                }
                let id = record.id.clone();
                match Armed::compile(record) {
                    Ok(armed) => inner.breakpoints.push(armed),
                    Err(e) => warn!(breakpoint_id = %id, error = %e, "skipping saved breakpoint"),
                }
            }
            info!(path = %store.path().display(), count = inner.breakpoints.len(), "breakpoints loaded");
        }
        Ok(Self { settings, store, inner: Mutex::new(inner) })
    }

    /// Settings in effect.
    pub fn settings(&self) -> &BreakpointSettings {
        &self.settings
    }

    fn persist(&self, inner: &Inner) {
        let Some(store) = &self.store else { return };
        let records: Vec<Breakpoint> = inner.breakpoints.iter().map(|a| a.record.clone()).collect();
        if let Err(e) = store.save(&records) {
            warn!(error = %e, "failed to persist breakpoints");
        }
    }

    /// Write the breakpoint set now, surfacing any error.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock();
        match &self.store {
            Some(store) => {
                let records: Vec<Breakpoint> =
                    inner.breakpoints.iter().map(|a| a.record.clone()).collect();
                store.save(&records)
            }
            None => Ok(()),
        }
    }

    // ── definitions ─────────────────────────────────────────────────────────

    /// Validate and arm a new breakpoint.
    pub fn create_breakpoint(&self, new: NewBreakpoint) -> Result<BreakpointId> {
        if new.name.trim().is_empty() {
            return Err(BreakpointError::Validation("name must not be empty".into()));
        }
        if new.max_hits == Some(0) {
            return Err(BreakpointError::Validation("max_hits must be at least 1".into()));
        }
        let now = Utc::now();
        let expires_at = match new.expires_in_hours {
            None => None,
            Some(hours) if hours.is_finite() && hours > 0.0 => {
                #[allow(clippy::cast_possible_truncation)]
                let millis = (hours * 3_600_000.0).round() as i64;
                Some(
                    TimeDelta::try_milliseconds(millis)
                        .and_then(|d| now.checked_add_signed(d))
                        .ok_or_else(|| BreakpointError::Validation(format!("expiry out of range: {hours}h")))?,
                )
            }
            Some(hours) => {
                return Err(BreakpointError::Validation(format!(
                    "expires_in_hours must be positive, got {hours}"
                )));
            }
        };

        let armed = Armed::compile(Breakpoint {
            id: BreakpointId::new(),
            name: new.name,
            description: new.description,
            module_pattern: new.module_pattern,
            event_type_pattern: new.event_type_pattern,
            condition: new.condition,
            status: BreakpointStatus::Active,
            created_by: new.created_by,
            created_at: now,
            hit_count: 0,
            max_hits: new.max_hits,
            expires_at,
            enabled: true,
        })?;

        let mut inner = self.inner.lock();
        if inner.armed_count() >= self.settings.max_breakpoints {
            return Err(BreakpointError::Validation(format!(
                "capacity of {} active breakpoints reached",
                self.settings.max_breakpoints
            )));
        }
        let id = armed.record.id.clone();
        info!(
            breakpoint_id = %id,
            name = %armed.record.name,
            module = %armed.record.module_pattern,
            event_type = %armed.record.event_type_pattern,
            "breakpoint created"
        );
        inner.breakpoints.push(armed);
        self.persist(&inner);
        Ok(id)
    }

    /// Remove a breakpoint. Pauses it caused stay until resolved.
    pub fn delete_breakpoint(&self, id: &BreakpointId) -> Result<()> {
        let mut inner = self.inner.lock();
        let pos = inner
            .breakpoints
            .iter()
            .position(|a| a.record.id == *id)
            .ok_or_else(|| BreakpointError::NotFound(id.to_string()))?;
        let _ = inner.breakpoints.remove(pos);
        info!(breakpoint_id = %id, "breakpoint deleted");
        self.persist(&inner);
        Ok(())
    }

    /// Re-arm a breakpoint.
    pub fn enable_breakpoint(&self, id: &BreakpointId) -> Result<()> {
        let now = Utc::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let armed_count = inner.armed_count();
        let armed = inner.find_mut(id).ok_or_else(|| BreakpointError::NotFound(id.to_string()))?;
        if !armed.record.status.is_armed() && armed_count >= self.settings.max_breakpoints {
            return Err(BreakpointError::Validation(format!(
                "capacity of {} active breakpoints reached",
                self.settings.max_breakpoints
            )));
        }
        armed.record.enabled = true;
        armed.record.status = if armed.record.is_expired_at(now) {
            BreakpointStatus::Expired
        } else if armed.outstanding > 0 {
            BreakpointStatus::Triggered
        } else {
            BreakpointStatus::Active
        };
        debug!(breakpoint_id = %id, status = %armed.record.status, "breakpoint enabled");
        self.persist(inner);
        Ok(())
    }

    /// Switch a breakpoint off.
    pub fn disable_breakpoint(&self, id: &BreakpointId) -> Result<()> {
        let mut inner = self.inner.lock();
        let armed = inner.find_mut(id).ok_or_else(|| BreakpointError::NotFound(id.to_string()))?;
        armed.record.enabled = false;
        armed.record.status = BreakpointStatus::Disabled;
        debug!(breakpoint_id = %id, "breakpoint disabled");
        self.persist(&inner);
        Ok(())
    }

    /// All breakpoints in creation order.
    pub fn get_breakpoints(&self) -> Vec<Breakpoint> {
        self.inner.lock().breakpoints.iter().map(|a| a.record.clone()).collect()
    }

    /// One breakpoint.
    pub fn get_breakpoint(&self, id: &BreakpointId) -> Option<Breakpoint> {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .find(|a| a.record.id == *id)
            .map(|a| a.record.clone())
    }

    // ── matching ────────────────────────────────────────────────────────────

    /// Find the first armed breakpoint (in creation order) matching the event.
    ///
    /// A match increments the hit count, records a hit and marks the
    /// breakpoint TRIGGERED, or DISABLED when that was its last allowed hit.
    /// Spent breakpoints met on the way are retired.
    pub fn check_breakpoint(&self, trace_id: &TraceId, ctx: &EventContext) -> Option<BreakpointId> {
        if !self.settings.enable_breakpoints {
            return None;
        }
        let now = Utc::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut changed = false;
        let mut matched = None;
        for (idx, armed) in inner.breakpoints.iter_mut().enumerate() {
            if armed.retire_if_spent(now) {
                changed = true;
                continue;
            }
            if !armed.can_match(now) || !armed.filters_match(ctx) {
                continue;
            }
            if condition_holds(armed, ctx, self.settings.condition_timeout_seconds) {
                matched = Some(idx);
                break;
            }
        }

        let Some(idx) = matched else {
            if changed {
                self.persist(inner);
            }
            return None;
        };

        let armed = &mut inner.breakpoints[idx];
        armed.record.hit_count += 1;
        armed.outstanding += 1;
        armed.record.status = if armed.record.is_exhausted() {
            BreakpointStatus::Disabled
        } else {
            BreakpointStatus::Triggered
        };
        let id = armed.record.id.clone();
        let hit_count = armed.record.hit_count;
        let status = armed.record.status;

        let hit_id = HitId::new();
        if let Some((previous, _)) = inner.unclaimed.insert(trace_id.clone(), (id.clone(), hit_id.clone())) {
            inner.release(&previous);
        }
        inner.record_hit(
            BreakpointHit {
                hit_id,
                breakpoint_id: id.clone(),
                trace_id: trace_id.clone(),
                event_data: ctx.to_json(),
                hit_timestamp: now,
                resolved_timestamp: None,
                resolution_action: None,
                resolved_by: None,
                override_payload: None,
            },
            self.settings.hit_history_limit,
        );
        info!(breakpoint_id = %id, trace_id = %trace_id, hit_count, status = %status, "breakpoint hit");
        self.persist(inner);
        Some(id)
    }

    // ── pause / resume ──────────────────────────────────────────────────────

    /// Register a pause of `trace_id` at `breakpoint_id`.
    ///
    /// An existing pause of the same trace is resolved with `auto_cleanup`
    /// first; when the paused-trace capacity is full the oldest pause is
    /// evicted the same way. Returns the hit being waited on.
    pub fn pause_trace(&self, trace_id: &TraceId, breakpoint_id: &BreakpointId, ctx: &EventContext) -> HitId {
        let now = Utc::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.resolve(trace_id, ResolutionAction::AutoCleanup, SYSTEM, None) {
            debug!(trace_id = %trace_id, "replaced existing pause");
        }
        let capacity = self.settings.max_paused_traces.max(1);
        while inner.paused.len() >= capacity {
            let oldest = inner.paused[0].info.trace_id.clone();
            warn!(evicted = %oldest, capacity, "paused-trace capacity reached, resuming oldest");
            let _ = inner.resolve(&oldest, ResolutionAction::AutoCleanup, SYSTEM, None);
        }

        let existing = match inner.unclaimed.remove(trace_id) {
            Some((matched, hit_id)) if matched == *breakpoint_id => Some(hit_id),
            Some((matched, _)) => {
                inner.release(&matched);
                None
            }
            None => None,
        };
        let hit_id = if let Some(hit_id) = existing {
            hit_id
        } else {
            let hit_id = HitId::new();
            if let Some(armed) = inner.find_mut(breakpoint_id) {
                armed.outstanding += 1;
                if armed.record.status == BreakpointStatus::Active {
                    armed.record.status = BreakpointStatus::Triggered;
                }
            }
            inner.record_hit(
                BreakpointHit {
                    hit_id: hit_id.clone(),
                    breakpoint_id: breakpoint_id.clone(),
                    trace_id: trace_id.clone(),
                    event_data: ctx.to_json(),
                    hit_timestamp: now,
                    resolved_timestamp: None,
                    resolution_action: None,
                    resolved_by: None,
                    override_payload: None,
                },
                self.settings.hit_history_limit,
            );
            hit_id
        };

        let timeout = Duration::from_secs(self.settings.default_timeout_minutes.saturating_mul(60));
        let timeout_at = TimeDelta::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let _ = inner.waiters.insert(trace_id.clone(), Arc::new(ResumeSlot::new(hit_id.clone())));
        inner.paused.push(PauseEntry {
            info: PausedTrace {
                trace_id: trace_id.clone(),
                breakpoint_id: breakpoint_id.clone(),
                hit_id: hit_id.clone(),
                paused_at: now,
                timeout_at,
                event_data: ctx.to_json(),
            },
            deadline: deadline_after(timeout),
        });
        info!(trace_id = %trace_id, breakpoint_id = %breakpoint_id, hit_id = %hit_id, "trace paused");
        hit_id
    }

    /// Block until the pause of `trace_id` is resolved or the deadline passes.
    ///
    /// The deadline is `timeout` from now when given, otherwise the pause's
    /// own `timeout_at`. On expiry the pause is resolved with `timeout` and
    /// no override. Returns `Continue` immediately when nothing is pending.
    pub fn wait_for_resume(&self, trace_id: &TraceId, timeout: Option<Duration>) -> ResumeOutcome {
        let (slot, deadline) = {
            let inner = self.inner.lock();
            let Some(slot) = inner.waiters.get(trace_id).cloned() else {
                return ResumeOutcome::proceed();
            };
            let deadline = match timeout {
                Some(timeout) => deadline_after(timeout),
                None => inner.pause_for(trace_id).map_or_else(Instant::now, |p| p.deadline),
            };
            (slot, deadline)
        };

        let outcome = {
            let mut state = slot.outcome.lock();
            while state.is_none() {
                if slot.ready.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            state.as_ref().map(|(outcome, _)| outcome.clone())
        };

        let outcome = outcome.unwrap_or_else(|| {
            {
                let mut inner = self.inner.lock();
                let still_ours = inner.pause_for(trace_id).is_some_and(|p| p.info.hit_id == slot.hit_id);
                if still_ours {
                    let _ = inner.resolve(trace_id, ResolutionAction::Timeout, SYSTEM, None);
                }
            }
            slot.outcome.lock().as_ref().map_or(
                ResumeOutcome { action: ResolutionAction::Timeout.into(), override_payload: None },
                |(outcome, _)| outcome.clone(),
            )
        });

        let mut inner = self.inner.lock();
        if inner.waiters.get(trace_id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            let _ = inner.waiters.remove(trace_id);
        }
        outcome
    }

    /// Resume a paused trace. Returns `false` when it was not paused.
    pub fn resume_trace(&self, trace_id: &TraceId, resolved_by: &str, override_payload: Option<JsonMap>) -> bool {
        let resumed =
            self.inner.lock().resolve(trace_id, ResolutionAction::Resume, resolved_by, override_payload);
        if !resumed {
            debug!(trace_id = %trace_id, "resume requested for trace that is not paused");
        }
        resumed
    }

    /// Currently paused traces, oldest first.
    pub fn get_paused_traces(&self) -> Vec<PausedTrace> {
        self.inner.lock().paused.iter().map(|p| p.info.clone()).collect()
    }

    /// Whether `trace_id` is paused.
    pub fn is_paused(&self, trace_id: &TraceId) -> bool {
        self.inner.lock().pause_for(trace_id).is_some()
    }

    /// Most recent hits, newest first.
    pub fn get_hit_history(&self, limit: usize) -> Vec<BreakpointHit> {
        self.inner.lock().hits.iter().rev().take(limit).cloned().collect()
    }

    /// Counts by status, hits and pauses.
    pub fn get_statistics(&self) -> BreakpointStatistics {
        let inner = self.inner.lock();
        let mut stats = BreakpointStatistics {
            total_breakpoints: inner.breakpoints.len(),
            paused_traces: inner.paused.len(),
            hit_history_size: inner.hits.len(),
            ..BreakpointStatistics::default()
        };
        for armed in &inner.breakpoints {
            *stats.by_status.entry(armed.record.status.as_str().to_string()).or_default() += 1;
            stats.total_hits += armed.record.hit_count;
        }
        stats
    }

    // ── maintenance ─────────────────────────────────────────────────────────

    /// Retire spent breakpoints, time out overdue pauses and drop resume
    /// slots nobody collected, as of `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if self.settings.auto_cleanup_expired {
            for armed in &mut inner.breakpoints {
                if armed.retire_if_spent(now) {
                    report.retired += 1;
                }
            }
        }

        let overdue: Vec<TraceId> = inner
            .paused
            .iter()
            .filter(|p| p.info.timeout_at <= now)
            .map(|p| p.info.trace_id.clone())
            .collect();
        for trace_id in &overdue {
            if inner.resolve(trace_id, ResolutionAction::AutoTimeout, SYSTEM, None) {
                report.timed_out += 1;
            }
        }

        let ttl = Duration::from_secs(self.settings.sweep_interval_seconds.max(1));
        let instant = Instant::now();
        let before = inner.waiters.len();
        inner.waiters.retain(|_, slot| !slot.is_stale(instant, ttl));
        report.purged_slots = before - inner.waiters.len();

        if report.retired > 0 {
            self.persist(inner);
        }
        if report != SweepReport::default() {
            debug!(?report, "breakpoint sweep");
        }
        report
    }

    /// Start the sweeper thread, running every `sweep_interval_seconds`.
    pub fn start_sweeper(self: &Arc<Self>) -> Result<SweeperHandle> {
        let interval = Duration::from_secs(self.settings.sweep_interval_seconds.max(1));
        let (shutdown, rx) = bounded::<()>(1);
        let manager = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name("sightline-breakpoints".into())
            .spawn(move || manager.sweeper_loop(&rx, interval))?;
        Ok(SweeperHandle { shutdown, thread: Some(thread) })
    }

    fn sweeper_loop(&self, shutdown: &Receiver<()>, interval: Duration) {
        loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let _ = self.sweep_at(Utc::now());
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("breakpoint sweeper stopped");
    }
}

/// Stops the sweeper thread when shut down or dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("breakpoint sweeper panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
