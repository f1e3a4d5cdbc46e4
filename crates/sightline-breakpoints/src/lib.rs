//! # sightline-breakpoints
//!
//! Conditional breakpoints over trace events.
//!
//! A breakpoint filters events by module and event-type glob plus an
//! optional condition (see [`sightline_core::condition`]). When an event
//! matches, the recording thread may pause on it until an operator resumes
//! the trace (optionally overriding the event payload) or the pause times
//! out. The breakpoint set is persisted to a JSON file after every change.
//!
//! - [`BreakpointManager`]: matching, pause/resume and the sweeper thread
//! - [`BreakpointStore`]: atomic JSON persistence

#![deny(unsafe_code)]

pub mod breakpoint;
pub mod errors;
pub mod manager;
pub mod store;

pub use breakpoint::{
    Breakpoint, BreakpointHit, BreakpointStatistics, BreakpointStatus, NewBreakpoint, PausedTrace,
    ResolutionAction, ResumeOutcome, WaitAction,
};
pub use errors::{BreakpointError, Result};
pub use manager::{BreakpointManager, SweepReport, SweeperHandle};
pub use store::BreakpointStore;
