//! Trace session and event records.
//!
//! These are the in-memory shapes produced by the tracer, persisted by the
//! store and read back by the query API. Enum variants serialize as
//! lowercase snake_case strings, matching the stored column values.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition::EventContext;
use crate::ids::{EventId, TraceId};

/// JSON object used for event payloads and metadata.
pub type JsonMap = Map<String, Value>;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stored string form.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", $label, ": {}"), other)),
                }
            }
        }
    };
}

string_enum!(
    /// Kind of occurrence an event records.
    EventType, "event type" {
        /// Trace opened.
        Start => "start",
        /// Trace closed.
        End => "end",
        /// A reasoning decision.
        Decision => "decision",
        /// An outbound tool invocation.
        ToolCall => "tool_call",
        /// A failure inside the pipeline.
        Error => "error",
        /// Data entering a module.
        DataIn => "data_in",
        /// Data leaving a module.
        DataOut => "data_out",
        /// A timing or resource measurement.
        Performance => "performance",
    }
);

string_enum!(
    /// Event severity.
    Severity, "severity" {
        /// Verbose diagnostics.
        Debug => "debug",
        /// Normal operation.
        Info => "info",
        /// Something unexpected but recoverable.
        Warning => "warning",
        /// A failed step.
        Error => "error",
        /// A failure that aborts the trace.
        Critical => "critical",
    }
);

string_enum!(
    /// Lifecycle state of a trace session.
    TraceStatus, "trace status" {
        /// Still receiving events.
        Active => "active",
        /// Ended successfully.
        Completed => "completed",
        /// Ended with a failure.
        Failed => "failed",
    }
);

/// A single recorded occurrence within a trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Unique event ID.
    pub event_id: EventId,
    /// Owning trace.
    pub trace_id: TraceId,
    /// When the event was appended.
    pub timestamp: DateTime<Utc>,
    /// Pipeline module that emitted the event.
    pub source_module: String,
    /// Event kind.
    pub event_type: EventType,
    /// Event severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Optional measured duration.
    pub duration_ms: Option<f64>,
    /// Parent event in the same trace.
    pub parent_event_id: Option<EventId>,
    /// Structured event data.
    pub payload: JsonMap,
    /// Recorder annotations (resource snapshot, sequence).
    pub metadata: JsonMap,
    /// Position within the trace, starting at 0.
    pub sequence_number: u64,
}

impl TraceEvent {
    /// Build the read-only context breakpoint conditions see for this event.
    pub fn context(&self) -> EventContext {
        EventContext {
            payload: self.payload.clone(),
            message: self.message.clone(),
            severity: self.severity,
            timestamp: self.timestamp,
            event_type: self.event_type,
            source_module: self.source_module.clone(),
        }
    }
}

/// One end-to-end execution of the host pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceSession {
    /// Unique trace ID.
    pub trace_id: TraceId,
    /// The query that started the trace.
    pub query: String,
    /// Requesting user, if known.
    pub user_id: Option<String>,
    /// Caller session, if known.
    pub session_id: Option<String>,
    /// When the trace started.
    pub start_time: DateTime<Utc>,
    /// When the trace ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: TraceStatus,
    /// Wall-clock duration in milliseconds, set on end.
    pub total_duration_ms: Option<f64>,
    /// Number of events recorded.
    pub event_count: u64,
    /// Modules that emitted at least one event.
    pub modules_involved: BTreeSet<String>,
    /// Outcome, set on end.
    pub success: Option<bool>,
    /// Length of the final response text, set on end.
    pub final_response_length: Option<u64>,
    /// Free-form annotations.
    pub metadata: JsonMap,
}

impl TraceSession {
    /// A fresh active session starting now.
    pub fn new(query: impl Into<String>, user_id: Option<String>, session_id: Option<String>) -> Self {
        Self {
            trace_id: TraceId::new(),
            query: query.into(),
            user_id,
            session_id,
            start_time: Utc::now(),
            end_time: None,
            status: TraceStatus::Active,
            total_duration_ms: None,
            event_count: 0,
            modules_involved: BTreeSet::new(),
            success: None,
            final_response_length: None,
            metadata: JsonMap::new(),
        }
    }

    /// Whether the session has been ended.
    pub fn is_finished(&self) -> bool {
        self.status != TraceStatus::Active
    }
}
