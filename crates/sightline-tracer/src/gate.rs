//! The seam between the logger and breakpoint matching.

use sightline_breakpoints::{BreakpointManager, ResumeOutcome};
use sightline_core::condition::EventContext;
use sightline_core::{BreakpointId, TraceId};

/// A breakpoint that fired and how its pause ended.
#[derive(Clone, Debug, PartialEq)]
pub struct Interception {
    /// Breakpoint that matched.
    pub breakpoint_id: BreakpointId,
    /// Resolution of the pause.
    pub outcome: ResumeOutcome,
}

/// Decides whether an event stops its trace, and blocks while it does.
///
/// Called without any logger lock held.
pub trait BreakpointGate: Send + Sync {
    /// Match the event; on a match pause the trace and wait for it to be
    /// resolved. `None` means the event proceeds untouched.
    fn intercept(&self, trace_id: &TraceId, ctx: &EventContext) -> Option<Interception>;
}

impl BreakpointGate for BreakpointManager {
    fn intercept(&self, trace_id: &TraceId, ctx: &EventContext) -> Option<Interception> {
        let breakpoint_id = self.check_breakpoint(trace_id, ctx)?;
        let _ = self.pause_trace(trace_id, &breakpoint_id, ctx);
        let outcome = self.wait_for_resume(trace_id, None);
        Some(Interception { breakpoint_id, outcome })
    }
}
