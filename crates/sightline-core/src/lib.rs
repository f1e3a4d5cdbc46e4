//! # sightline-core
//!
//! Shared vocabulary for the sightline crates:
//!
//! - **Branded IDs**: `TraceId`, `EventId`, `BreakpointId`, `HitId`
//! - **Trace records**: [`TraceSession`] and [`TraceEvent`] with their enums
//! - **Condition language**: [`condition::Condition`], compiled once and
//!   evaluated against an [`condition::EventContext`]
//! - **Patterns**: case-insensitive glob filters for module and event names
//! - **Logging**: subscriber initialisation

#![deny(unsafe_code)]

pub mod condition;
pub mod ids;
pub mod logging;
pub mod pattern;
pub mod types;

pub use ids::{BreakpointId, EventId, HitId, TraceId};
pub use types::{EventType, JsonMap, Severity, TraceEvent, TraceSession, TraceStatus};
