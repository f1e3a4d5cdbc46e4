//! [`TraceLogger`]: the producer API the reasoning pipeline calls.
//!
//! Sessions and their events live in one mutex-guarded map. `log_event`
//! runs in three steps: validate against the map, consult the breakpoint
//! gate with no lock held (this may block for a human), then stamp and
//! append under the lock. Sequence numbers and timestamps are assigned in
//! that last step, so a trace's events are always numbered `0..N` in append
//! order with non-decreasing timestamps even when several threads log to it.
//!
//! Nothing here returns an error to the pipeline. Unknown traces, an open
//! `tracing` breaker and persistence failures are logged and swallowed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use sightline_core::condition::EventContext;
use sightline_core::{EventId, EventType, JsonMap, Severity, TraceEvent, TraceId, TraceSession, TraceStatus};
use sightline_settings::{PerformanceMetric, TRACING_BREAKER, TracerSettings};
use sightline_store::MetricSample;
use sightline_telemetry::{BreakerError, PerformanceManager};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::event::NewEvent;
use crate::gate::{BreakpointGate, Interception};
use crate::probe::{ResourceProbe, ResourceSnapshot};
use crate::sink::{FinishedTrace, PersistWorker, TraceSink};

/// Module name on the START and END events.
pub const LOGGER_MODULE: &str = "TraceLogger";

/// Appended to the message of an event whose payload an operator replaced.
pub const OVERRIDE_SUFFIX: &str = " [OVERRIDE APPLIED]";

#[derive(Debug, Error)]
#[error("trace is not active")]
struct TraceGone;

/// Condensed view of one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceSummary {
    /// Trace ID.
    pub trace_id: TraceId,
    /// Query that started the trace.
    pub query: String,
    /// Lifecycle state.
    pub status: TraceStatus,
    /// Start time.
    pub start_time: DateTime<Utc>,
    /// Duration, once ended.
    pub total_duration_ms: Option<f64>,
    /// Events recorded so far.
    pub event_count: u64,
    /// Modules seen, sorted.
    pub modules_involved: Vec<String>,
    /// Outcome, once ended.
    pub success: Option<bool>,
}

impl From<&TraceSession> for TraceSummary {
    fn from(session: &TraceSession) -> Self {
        Self {
            trace_id: session.trace_id.clone(),
            query: session.query.clone(),
            status: session.status,
            start_time: session.start_time,
            total_duration_ms: session.total_duration_ms,
            event_count: session.event_count,
            modules_involved: session.modules_involved.iter().cloned().collect(),
            success: session.success,
        }
    }
}

struct TraceEntry {
    session: TraceSession,
    events: Vec<TraceEvent>,
    event_ids: HashSet<EventId>,
    started: Instant,
    overhead: Duration,
}

impl TraceEntry {
    fn new(session: TraceSession) -> Self {
        Self {
            session,
            events: Vec::new(),
            event_ids: HashSet::new(),
            started: Instant::now(),
            overhead: Duration::ZERO,
        }
    }

    fn is_active(&self) -> bool {
        !self.session.is_finished()
    }
}

/// Records trace sessions and their events.
pub struct TraceLogger {
    settings: TracerSettings,
    traces: Mutex<HashMap<TraceId, TraceEntry>>,
    gate: Option<Arc<dyn BreakpointGate>>,
    performance: Arc<PerformanceManager>,
    probe: ResourceProbe,
    worker: Mutex<Option<PersistWorker>>,
}

impl std::fmt::Debug for TraceLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLogger")
            .field("traces", &self.traces.lock().len())
            .field("breakpoints", &self.gate.is_some())
            .field("persisting", &self.worker.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl TraceLogger {
    /// A logger with no breakpoints and no persistence.
    pub fn new(settings: TracerSettings, performance: Arc<PerformanceManager>) -> Self {
        let probe = ResourceProbe::new(Duration::from_millis(settings.resource_probe_interval_ms));
        Self {
            settings,
            traces: Mutex::new(HashMap::new()),
            gate: None,
            performance,
            probe,
            worker: Mutex::new(None),
        }
    }

    /// Consult `gate` before every event.
    #[must_use]
    pub fn with_breakpoints(mut self, gate: Arc<dyn BreakpointGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Persist finished traces to `sink` from a background worker.
    pub fn with_sink(self, sink: Arc<dyn TraceSink>) -> Result<Self> {
        let worker =
            PersistWorker::spawn(sink, Arc::clone(&self.performance), self.settings.persist_queue_capacity)?;
        *self.worker.lock() = Some(worker);
        Ok(self)
    }

    /// The performance manager fed by this logger.
    pub fn performance(&self) -> &Arc<PerformanceManager> {
        &self.performance
    }

    // ── producer API ────────────────────────────────────────────────────────

    /// Open a trace and emit its START event. Always returns a fresh ID.
    pub fn start_trace(&self, query: &str, user_id: Option<String>, session_id: Option<String>) -> TraceId {
        let session = TraceSession::new(query, user_id.clone(), session_id.clone());
        let trace_id = session.trace_id.clone();
        let _ = self.traces.lock().insert(trace_id.clone(), TraceEntry::new(session));
        info!(trace_id = %trace_id, user_id = user_id.as_deref(), "trace started");

        let payload = object(json!({
            "query": query,
            "query_length": query.chars().count(),
            "user_id": user_id,
            "session_id": session_id,
        }));
        let preview: String = query.chars().take(100).collect();
        let start = NewEvent::new(LOGGER_MODULE, EventType::Start, Severity::Info, format!("Trace started: {preview}"))
            .payload(payload);
        let _ = self.log_event(&trace_id, start);
        trace_id
    }

    /// Record one event. Returns `None` when nothing was recorded.
    ///
    /// A matching breakpoint blocks this call until the pause is resolved.
    /// A replacement payload from the operator is merged into the event and
    /// the message is marked with [`OVERRIDE_SUFFIX`].
    pub fn log_event(&self, trace_id: &TraceId, mut event: NewEvent) -> Option<EventId> {
        let breaker = self.performance.breaker(TRACING_BREAKER);
        if breaker.as_ref().is_some_and(|b| !b.would_admit()) {
            debug!(trace_id = %trace_id, "tracing suspended, event dropped");
            return None;
        }
        let started = Instant::now();

        {
            let traces = self.traces.lock();
            let Some(entry) = traces.get(trace_id).filter(|e| e.is_active()) else {
                warn!(trace_id = %trace_id, module = %event.source_module, "event for unknown or ended trace");
                return None;
            };
            if let Some(parent) = &event.parent_event_id {
                if !entry.event_ids.contains(parent) {
                    warn!(trace_id = %trace_id, parent = %parent, "unknown parent event, dropping link");
                    event.parent_event_id = None;
                }
            }
        }

        let mut paused = Duration::ZERO;
        if let Some(gate) = &self.gate {
            let ctx = EventContext {
                payload: event.payload.clone(),
                message: event.message.clone(),
                severity: event.severity,
                timestamp: Utc::now(),
                event_type: event.event_type,
                source_module: event.source_module.clone(),
            };
            let waited = Instant::now();
            if let Some(interception) = gate.intercept(trace_id, &ctx) {
                paused = waited.elapsed();
                apply_interception(&mut event, &interception);
            }
        }

        let resources = self.probe.snapshot();
        let spent = started.elapsed().saturating_sub(paused);
        let record = || self.append(trace_id, event, resources, spent);
        let result = match &breaker {
            Some(breaker) => breaker.call(record),
            None => record().map_err(BreakerError::Inner),
        };

        match result {
            Ok(event_id) => Some(event_id),
            Err(BreakerError::Inner(e)) => {
                warn!(trace_id = %trace_id, error = %e, "event not recorded");
                None
            }
            Err(e) => {
                warn!(trace_id = %trace_id, error = %e, "tracing breaker rejected event");
                None
            }
        }
    }

    fn append(
        &self,
        trace_id: &TraceId,
        event: NewEvent,
        resources: ResourceSnapshot,
        spent: Duration,
    ) -> std::result::Result<EventId, TraceGone> {
        let mut traces = self.traces.lock();
        let entry = traces.get_mut(trace_id).filter(|e| e.is_active()).ok_or(TraceGone)?;

        let sequence_number = entry.events.len() as u64;
        let now = Utc::now();
        let timestamp = entry.events.last().map_or(now, |last| last.timestamp.max(now));

        let mut metadata = event.metadata;
        let _ = metadata.insert("memory_usage_mb".into(), json!(resources.memory_usage_mb));
        let _ = metadata.insert("cpu_usage_percent".into(), json!(resources.cpu_usage_percent));
        let _ = metadata.insert("event_sequence".into(), json!(sequence_number));

        let event_id = EventId::new();
        let _ = entry.session.modules_involved.insert(event.source_module.clone());
        entry.events.push(TraceEvent {
            event_id: event_id.clone(),
            trace_id: trace_id.clone(),
            timestamp,
            source_module: event.source_module,
            event_type: event.event_type,
            severity: event.severity,
            message: event.message,
            duration_ms: event.duration_ms,
            parent_event_id: event.parent_event_id,
            payload: event.payload,
            metadata,
            sequence_number,
        });
        entry.session.event_count = entry.events.len() as u64;
        let _ = entry.event_ids.insert(event_id.clone());
        entry.overhead += spent;
        Ok(event_id)
    }

    /// Close a trace: emit its END event, finalise the session, feed the
    /// performance monitor and queue the trace for persistence.
    pub fn end_trace(&self, trace_id: &TraceId, success: bool, final_response: Option<&str>) {
        let (started, modules, events_logged) = {
            let traces = self.traces.lock();
            let Some(entry) = traces.get(trace_id).filter(|e| e.is_active()) else {
                warn!(trace_id = %trace_id, "end_trace for unknown or ended trace");
                return;
            };
            let modules: Vec<String> = entry.session.modules_involved.iter().cloned().collect();
            (entry.started, modules, entry.events.len())
        };

        let elapsed = started.elapsed();
        let total_duration_ms = elapsed.as_secs_f64() * 1000.0;
        let final_response_length = final_response.map(|r| r.chars().count() as u64);
        let payload = object(json!({
            "success": success,
            "total_duration_ms": total_duration_ms,
            "final_response_length": final_response_length,
            "events_logged": events_logged,
            "modules_involved": modules,
        }));
        let (severity, verb) = if success { (Severity::Info, "completed") } else { (Severity::Error, "failed") };
        let end = NewEvent::new(LOGGER_MODULE, EventType::End, severity, format!("Trace {verb}"))
            .duration_ms(total_duration_ms)
            .payload(payload);
        let _ = self.log_event(trace_id, end);

        let Some((mut finished, overhead)) = self.finalise(trace_id, success, total_duration_ms, final_response_length)
        else {
            return;
        };

        let overhead_fraction =
            if elapsed.is_zero() { 0.0 } else { overhead.as_secs_f64() / elapsed.as_secs_f64() };
        let resources = self.probe.snapshot();
        let samples = [
            (PerformanceMetric::ResponseTime, elapsed.as_secs_f64()),
            (PerformanceMetric::Throughput, 1.0),
            (PerformanceMetric::ErrorRate, if success { 0.0 } else { 1.0 }),
            (PerformanceMetric::TraceOverhead, overhead_fraction),
            (PerformanceMetric::MemoryUsage, resources.memory_fraction),
            (PerformanceMetric::CpuUsage, resources.cpu_usage_percent / 100.0),
        ];
        let mut context = JsonMap::new();
        let _ = context.insert("trace_id".into(), Value::from(trace_id.as_str()));
        for (metric, value) in samples {
            let _ = self.performance.record_metric(metric, value, Some(context.clone()));
            finished.metrics.push(MetricSample::now(metric.as_str(), value));
        }

        info!(
            trace_id = %trace_id,
            success,
            duration_ms = total_duration_ms,
            events = finished.events.len(),
            "trace ended"
        );
        if let Some(worker) = self.worker.lock().as_ref() {
            let _ = worker.submit(finished);
        }
    }

    fn finalise(
        &self,
        trace_id: &TraceId,
        success: bool,
        total_duration_ms: f64,
        final_response_length: Option<u64>,
    ) -> Option<(FinishedTrace, Duration)> {
        let mut traces = self.traces.lock();
        let entry = traces.get_mut(trace_id).filter(|e| e.is_active())?;
        let session = &mut entry.session;
        session.end_time = Some(Utc::now());
        session.status = if success { TraceStatus::Completed } else { TraceStatus::Failed };
        session.total_duration_ms = Some(total_duration_ms);
        session.success = Some(success);
        session.final_response_length = final_response_length;
        session.event_count = entry.events.len() as u64;
        let finished = FinishedTrace { session: session.clone(), events: entry.events.clone(), metrics: Vec::new() };
        Some((finished, entry.overhead))
    }

    // ── queries ─────────────────────────────────────────────────────────────

    /// Events of a trace held in memory, in sequence order.
    pub fn get_trace_events(&self, trace_id: &TraceId) -> Vec<TraceEvent> {
        self.traces.lock().get(trace_id).map(|e| e.events.clone()).unwrap_or_default()
    }

    /// Summary of a trace held in memory.
    pub fn get_trace_summary(&self, trace_id: &TraceId) -> Option<TraceSummary> {
        self.traces.lock().get(trace_id).map(|e| TraceSummary::from(&e.session))
    }

    /// Traces not yet ended, oldest first.
    pub fn get_active_traces(&self) -> Vec<TraceSummary> {
        let mut active: Vec<TraceSummary> = self
            .traces
            .lock()
            .values()
            .filter(|e| e.is_active())
            .map(|e| TraceSummary::from(&e.session))
            .collect();
        active.sort_by_key(|s| s.start_time);
        active
    }

    // ── housekeeping ────────────────────────────────────────────────────────

    /// Forget in-memory traces started more than `max_age_hours` ago.
    /// Durable storage is untouched.
    pub fn cleanup_old_traces(&self, max_age_hours: u64) -> usize {
        let Some(cutoff) = i64::try_from(max_age_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut traces = self.traces.lock();
        let before = traces.len();
        traces.retain(|_, entry| entry.session.start_time >= cutoff);
        let removed = before - traces.len();
        if removed > 0 {
            info!(removed, max_age_hours, "purged old in-memory traces");
        }
        removed
    }

    /// [`Self::cleanup_old_traces`] with the configured age.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_old_traces(self.settings.max_trace_age_hours)
    }

    /// Drain the persistence queue and stop the worker.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.shutdown();
            debug!("trace logger shut down");
        }
    }
}

impl Drop for TraceLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_interception(event: &mut NewEvent, interception: &Interception) {
    let _ = event.metadata.insert("breakpoint_id".into(), json!(interception.breakpoint_id));
    let _ = event.metadata.insert("breakpoint_action".into(), json!(interception.outcome.action));
    if let Some(replacement) = &interception.outcome.override_payload {
        event.payload.extend(replacement.iter().map(|(k, v)| (k.clone(), v.clone())));
        event.message.push_str(OVERRIDE_SUFFIX);
    }
}

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_breakpoints::{BreakpointManager, NewBreakpoint, WaitAction};
    use sightline_settings::BreakpointSettings;
    use sightline_store::TraceDatabase;
    use sightline_telemetry::CircuitState;

    fn logger() -> TraceLogger {
        TraceLogger::new(TracerSettings::default(), Arc::new(PerformanceManager::with_defaults()))
    }

    fn breakpoints() -> Arc<BreakpointManager> {
        let settings = BreakpointSettings { storage_path: None, ..BreakpointSettings::default() };
        Arc::new(BreakpointManager::new(settings).unwrap())
    }

    fn decision(severity: Severity) -> NewEvent {
        NewEvent::new("Planner", EventType::Decision, severity, "picked a plan")
    }

    fn wait_until(what: impl Fn() -> bool) {
        for _ in 0..500 {
            if what() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition never became true");
    }

    // ── recording ──

    #[test]
    fn start_and_end_bracket_the_trace() {
        let logger = logger();
        let trace = logger.start_trace("why is the sky blue?", Some("u1".into()), None);
        let _ = logger.log_event(&trace, decision(Severity::Info)).unwrap();
        logger.end_trace(&trace, true, Some("Rayleigh scattering"));

        let events = logger.get_trace_events(&trace);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::Start);
        assert_eq!(events[0].payload["query_length"], 20);
        assert_eq!(events[0].payload["user_id"], "u1");
        assert_eq!(events[2].event_type, EventType::End);
        assert_eq!(events[2].payload["final_response_length"], 19);
        assert_eq!(events[2].payload["events_logged"], 2);

        let summary = logger.get_trace_summary(&trace).unwrap();
        assert_eq!(summary.status, TraceStatus::Completed);
        assert_eq!(summary.success, Some(true));
        assert_eq!(summary.event_count, 3);
        assert_eq!(summary.modules_involved, vec!["Planner", LOGGER_MODULE]);
        assert!(logger.get_active_traces().is_empty());
    }

    #[test]
    fn failed_trace_ends_with_error_event() {
        let logger = logger();
        let trace = logger.start_trace("q", None, None);
        logger.end_trace(&trace, false, None);
        let events = logger.get_trace_events(&trace);
        assert_eq!(events.last().unwrap().severity, Severity::Error);
        assert_eq!(logger.get_trace_summary(&trace).unwrap().status, TraceStatus::Failed);
    }

    #[test]
    fn sequence_numbers_are_dense_under_concurrency() {
        let logger = Arc::new(logger());
        let trace = logger.start_trace("q", None, None);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let logger = Arc::clone(&logger);
                let trace = trace.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let _ = logger.log_event(&trace, decision(Severity::Debug)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        logger.end_trace(&trace, true, None);

        let events = logger.get_trace_events(&trace);
        assert_eq!(events.len(), 102);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_number, i as u64);
            assert_eq!(event.metadata["event_sequence"], i as u64);
        }
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn unknown_or_ended_traces_record_nothing() {
        let logger = logger();
        assert_eq!(logger.log_event(&TraceId::new(), decision(Severity::Info)), None);
        let trace = logger.start_trace("q", None, None);
        logger.end_trace(&trace, true, None);
        assert_eq!(logger.log_event(&trace, decision(Severity::Info)), None);
        logger.end_trace(&trace, true, None);
        assert_eq!(logger.get_trace_events(&trace).len(), 2);
    }

    #[test]
    fn unknown_parent_is_dropped() {
        let logger = logger();
        let trace = logger.start_trace("q", None, None);
        let parent = logger.log_event(&trace, decision(Severity::Info)).unwrap();
        let child = decision(Severity::Info).parent(parent.clone());
        let orphan = decision(Severity::Info).parent(EventId::new());
        let _ = logger.log_event(&trace, child).unwrap();
        let _ = logger.log_event(&trace, orphan).unwrap();

        let events = logger.get_trace_events(&trace);
        assert_eq!(events[2].parent_event_id, Some(parent));
        assert_eq!(events[3].parent_event_id, None);
    }

    #[test]
    fn events_carry_resource_metadata() {
        let logger = logger();
        let trace = logger.start_trace("q", None, None);
        let event = &logger.get_trace_events(&trace)[0];
        assert!(event.metadata.contains_key("memory_usage_mb"));
        assert!(event.metadata.contains_key("cpu_usage_percent"));
    }

    #[test]
    fn cleanup_forgets_old_traces_only() {
        let logger = logger();
        let _ = logger.start_trace("q", None, None);
        assert_eq!(logger.cleanup_old_traces(1), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(logger.cleanup_old_traces(0), 1);
        assert!(logger.get_active_traces().is_empty());
    }

    // ── breakpoints ──

    #[test]
    fn planner_error_pauses_until_resumed_with_override() {
        let manager = breakpoints();
        let _ = manager
            .create_breakpoint(NewBreakpoint::new("planner errors", "Planner", "decision", r#"severity == "error""#))
            .unwrap();
        let logger = Arc::new(logger().with_breakpoints(manager.clone()));
        let trace = logger.start_trace("q", None, None);

        let _ = logger.log_event(&trace, decision(Severity::Info)).unwrap();
        assert!(!manager.is_paused(&trace));

        let producer = {
            let logger = Arc::clone(&logger);
            let trace = trace.clone();
            std::thread::spawn(move || logger.log_event(&trace, decision(Severity::Error)))
        };
        wait_until(|| manager.is_paused(&trace));
        assert_eq!(logger.get_trace_events(&trace).len(), 2);

        let mut replacement = JsonMap::new();
        let _ = replacement.insert("plan".into(), json!("fallback"));
        assert!(manager.resume_trace(&trace, "operator", Some(replacement)));
        assert!(producer.join().unwrap().is_some());

        let events = logger.get_trace_events(&trace);
        let paused = &events[2];
        assert_eq!(paused.payload["plan"], "fallback");
        assert_eq!(paused.message, format!("picked a plan{OVERRIDE_SUFFIX}"));
        assert_eq!(paused.metadata["breakpoint_action"], json!(WaitAction::Resume));
    }

    #[test]
    fn resume_without_override_keeps_event() {
        let manager = breakpoints();
        let _ = manager.create_breakpoint(NewBreakpoint::new("all", "Planner", "*", "")).unwrap();
        let logger = Arc::new(logger().with_breakpoints(manager.clone()));
        let trace = logger.start_trace("q", None, None);

        let producer = {
            let logger = Arc::clone(&logger);
            let trace = trace.clone();
            std::thread::spawn(move || logger.log_event(&trace, decision(Severity::Info)))
        };
        wait_until(|| manager.is_paused(&trace));
        assert!(manager.resume_trace(&trace, "operator", None));
        let _ = producer.join().unwrap().unwrap();

        let event = &logger.get_trace_events(&trace)[1];
        assert_eq!(event.message, "picked a plan");
        assert!(event.payload.is_empty());
    }

    // ── degradation ──

    #[test]
    fn open_tracing_breaker_suspends_recording() {
        let logger = logger();
        let breaker = logger.performance().breaker(TRACING_BREAKER).unwrap();
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);

        let trace = logger.start_trace("q", None, None);
        assert_eq!(logger.log_event(&trace, decision(Severity::Info)), None);
        assert!(logger.get_trace_events(&trace).is_empty());
        assert_eq!(logger.get_active_traces().len(), 1);

        breaker.force_close();
        assert!(logger.log_event(&trace, decision(Severity::Info)).is_some());
        assert_eq!(logger.get_trace_events(&trace)[0].sequence_number, 0);
    }

    #[test]
    fn end_trace_feeds_the_monitor() {
        let logger = logger();
        let trace = logger.start_trace("q", None, None);
        logger.end_trace(&trace, false, None);
        let monitor = logger.performance().monitor();
        for metric in [
            PerformanceMetric::ResponseTime,
            PerformanceMetric::Throughput,
            PerformanceMetric::ErrorRate,
            PerformanceMetric::TraceOverhead,
            PerformanceMetric::MemoryUsage,
            PerformanceMetric::CpuUsage,
        ] {
            assert_eq!(monitor.sample_count(metric), 1, "{metric}");
        }
        let memory = monitor.metric_summary(PerformanceMetric::MemoryUsage, Duration::from_secs(60)).unwrap();
        assert!((0.0..=1.0).contains(&memory.current));
    }

    // ── persistence ──

    #[test]
    fn finished_traces_reach_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = TraceDatabase::open_path(&dir.path().join("traces.db"), &Default::default()).unwrap();
        let logger = logger().with_sink(Arc::new(db.clone())).unwrap();

        let trace = logger.start_trace("q", Some("u1".into()), None);
        for _ in 0..5 {
            let _ = logger.log_event(&trace, decision(Severity::Info)).unwrap();
        }
        logger.end_trace(&trace, true, Some("done"));
        logger.shutdown();

        let stored = db.get_trace(trace.as_str()).unwrap().unwrap();
        assert_eq!(stored.status, TraceStatus::Completed);
        assert_eq!(stored.event_count, 7);
        let events = db.get_trace_events(trace.as_str(), usize::MAX, 0).unwrap();
        let sequence: Vec<u64> = events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, (0..7).collect::<Vec<u64>>());
        assert_eq!(db.get_trace_metrics(trace.as_str()).unwrap().len(), 6);
    }
}
