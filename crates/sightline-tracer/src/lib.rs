//! # sightline-tracer
//!
//! The producer side: [`TraceLogger`] records sessions and events for the
//! reasoning pipeline, consults breakpoints through a [`BreakpointGate`],
//! feeds the performance monitor and hands finished traces to a background
//! [`TraceSink`]. Recording is fail-open: nothing here returns an error to
//! the pipeline once the logger is built.

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod gate;
pub mod logger;
pub mod probe;
pub mod sink;

pub use errors::{Result, TracerError};
pub use event::NewEvent;
pub use gate::{BreakpointGate, Interception};
pub use logger::{LOGGER_MODULE, OVERRIDE_SUFFIX, TraceLogger, TraceSummary};
pub use probe::{ResourceProbe, ResourceSnapshot};
pub use sink::{FinishedTrace, TraceSink};
