//! Input shape for [`crate::TraceLogger::log_event`].

use sightline_core::{EventId, EventType, JsonMap, Severity};

/// An event as the pipeline describes it, before the logger stamps it.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    /// Emitting module.
    pub source_module: String,
    /// Event kind.
    pub event_type: EventType,
    /// Event severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Measured duration, if any.
    pub duration_ms: Option<f64>,
    /// Parent event in the same trace.
    pub parent_event_id: Option<EventId>,
    /// Structured data.
    pub payload: JsonMap,
    /// Caller annotations; the logger adds its own keys.
    pub metadata: JsonMap,
}

impl NewEvent {
    /// Event with empty payload and metadata.
    pub fn new(
        source_module: impl Into<String>,
        event_type: EventType,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_module: source_module.into(),
            event_type,
            severity,
            message: message.into(),
            duration_ms: None,
            parent_event_id: None,
            payload: JsonMap::new(),
            metadata: JsonMap::new(),
        }
    }

    /// Set the measured duration.
    #[must_use]
    pub fn duration_ms(mut self, ms: f64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Nest under `parent`.
    #[must_use]
    pub fn parent(mut self, parent: EventId) -> Self {
        self.parent_event_id = Some(parent);
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn payload(mut self, payload: JsonMap) -> Self {
        self.payload = payload;
        self
    }

    /// Set caller metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }
}
