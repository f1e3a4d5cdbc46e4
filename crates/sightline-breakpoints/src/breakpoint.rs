//! Breakpoint records, hits and pauses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sightline_core::{BreakpointId, HitId, JsonMap, TraceId};

/// Lifecycle of a breakpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointStatus {
    /// Armed and matching.
    Active,
    /// Switched off by an operator or by exhausting `max_hits`.
    Disabled,
    /// Has an unresolved hit; still matching.
    Triggered,
    /// Past `expires_at`.
    Expired,
}

impl BreakpointStatus {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Triggered => "triggered",
            Self::Expired => "expired",
        }
    }

    /// Active or triggered.
    pub fn is_armed(self) -> bool {
        matches!(self, Self::Active | Self::Triggered)
    }
}

impl std::fmt::Display for BreakpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conditional breakpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Identifier.
    pub id: BreakpointId,
    /// Short name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Glob over `source_module`.
    pub module_pattern: String,
    /// Glob over `event_type`.
    pub event_type_pattern: String,
    /// Condition source; empty matches every event.
    #[serde(default)]
    pub condition: String,
    /// Lifecycle state.
    pub status: BreakpointStatus,
    /// Who created it.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Matches so far.
    #[serde(default)]
    pub hit_count: u64,
    /// Matches allowed before the breakpoint disables itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hits: Option<u64>,
    /// Expiry instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Operator switch.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl Breakpoint {
    /// Whether `max_hits` has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_hits.is_some_and(|max| self.hit_count >= max)
    }

    /// Whether `expires_at` is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Input to [`crate::BreakpointManager::create_breakpoint`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewBreakpoint {
    /// Short name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Glob over `source_module`.
    pub module_pattern: String,
    /// Glob over `event_type`.
    pub event_type_pattern: String,
    /// Condition source.
    pub condition: String,
    /// Creator.
    pub created_by: String,
    /// Hit budget.
    pub max_hits: Option<u64>,
    /// Lifetime in hours.
    pub expires_in_hours: Option<f64>,
}

impl NewBreakpoint {
    /// A breakpoint with no description, hit budget or expiry.
    pub fn new(
        name: impl Into<String>,
        module_pattern: impl Into<String>,
        event_type_pattern: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            module_pattern: module_pattern.into(),
            event_type_pattern: event_type_pattern.into(),
            condition: condition.into(),
            created_by: "system".to_string(),
            max_hits: None,
            expires_in_hours: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the creator.
    #[must_use]
    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }

    /// Disable after `max` matches.
    #[must_use]
    pub fn max_hits(mut self, max: u64) -> Self {
        self.max_hits = Some(max);
        self
    }

    /// Expire after `hours`.
    #[must_use]
    pub fn expires_in_hours(mut self, hours: f64) -> Self {
        self.expires_in_hours = Some(hours);
        self
    }
}

/// How a pause ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// An operator resumed the trace.
    Resume,
    /// The waiter's deadline passed.
    Timeout,
    /// Evicted to make room for a newer pause.
    AutoCleanup,
    /// The sweeper found the pause past its deadline.
    AutoTimeout,
}

impl ResolutionAction {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Timeout => "timeout",
            Self::AutoCleanup => "auto_cleanup",
            Self::AutoTimeout => "auto_timeout",
        }
    }
}

/// One breakpoint match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakpointHit {
    /// Identifier.
    pub hit_id: HitId,
    /// Breakpoint that matched.
    pub breakpoint_id: BreakpointId,
    /// Trace that matched.
    pub trace_id: TraceId,
    /// Snapshot of the event context.
    pub event_data: Value,
    /// When it matched.
    pub hit_timestamp: DateTime<Utc>,
    /// When the pause ended.
    pub resolved_timestamp: Option<DateTime<Utc>>,
    /// How the pause ended.
    pub resolution_action: Option<ResolutionAction>,
    /// Who ended it.
    pub resolved_by: Option<String>,
    /// Payload supplied on resume.
    pub override_payload: Option<JsonMap>,
}

impl BreakpointHit {
    /// Whether the hit has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolved_timestamp.is_some()
    }
}

/// A trace blocked at a breakpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PausedTrace {
    /// Paused trace.
    pub trace_id: TraceId,
    /// Breakpoint that paused it.
    pub breakpoint_id: BreakpointId,
    /// Hit being waited on.
    pub hit_id: HitId,
    /// When it paused.
    pub paused_at: DateTime<Utc>,
    /// When it is resumed automatically.
    pub timeout_at: DateTime<Utc>,
    /// Snapshot of the event context.
    pub event_data: Value,
}

/// What the waiting thread should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitAction {
    /// The trace was not paused.
    Continue,
    /// Resumed by an operator.
    Resume,
    /// Deadline passed.
    Timeout,
    /// Evicted by a newer pause.
    AutoCleanup,
    /// Timed out by the sweeper.
    AutoTimeout,
}

impl From<ResolutionAction> for WaitAction {
    fn from(action: ResolutionAction) -> Self {
        match action {
            ResolutionAction::Resume => Self::Resume,
            ResolutionAction::Timeout => Self::Timeout,
            ResolutionAction::AutoCleanup => Self::AutoCleanup,
            ResolutionAction::AutoTimeout => Self::AutoTimeout,
        }
    }
}

/// Result of [`crate::BreakpointManager::wait_for_resume`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeOutcome {
    /// How the wait ended.
    pub action: WaitAction,
    /// Replacement payload, only ever set on `Resume`.
    pub override_payload: Option<JsonMap>,
}

impl ResumeOutcome {
    /// The trace was not paused.
    pub fn proceed() -> Self {
        Self { action: WaitAction::Continue, override_payload: None }
    }
}

/// Counts reported by [`crate::BreakpointManager::get_statistics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BreakpointStatistics {
    /// All breakpoints.
    pub total_breakpoints: usize,
    /// Breakpoints per status.
    pub by_status: std::collections::BTreeMap<String, usize>,
    /// Sum of hit counts.
    pub total_hits: u64,
    /// Currently paused traces.
    pub paused_traces: usize,
    /// Retained hits.
    pub hit_history_size: usize,
}
