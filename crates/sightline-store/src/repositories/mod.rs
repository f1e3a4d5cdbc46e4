//! Stateless repositories over the trace schema.
//!
//! Every method takes a `&Connection`, so callers decide whether a group of
//! calls shares a transaction.

pub mod analytics;
pub mod event;
pub mod metric;
pub mod trace;

pub use analytics::AnalyticsCacheRepo;
pub use event::EventRepo;
pub use metric::{MetricRepo, MetricSample, StoredMetric};
pub use trace::{TraceFilter, TraceRepo};
