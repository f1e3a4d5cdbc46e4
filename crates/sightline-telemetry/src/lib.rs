//! # sightline-telemetry
//!
//! Keeps tracing from hurting the pipeline it observes:
//!
//! - [`PerformanceMonitor`]: rolling-window metrics with warning/critical alerts
//! - [`CircuitBreaker`]: closed / open / half-open guard around an operation class
//! - [`PerformanceManager`]: the breaker registry, the alert → breaker
//!   feedback loop, alert sinks and the health score

#![deny(unsafe_code)]

pub mod breaker;
pub mod errors;
pub mod manager;
pub mod monitor;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use errors::BreakerError;
pub use manager::{AlertSink, HealthReport, HealthStatus, PerformanceManager};
pub use monitor::{
    AlertSeverity, MetricSummary, PerformanceAlert, PerformanceMonitor, TrendPoint,
};
pub use sightline_settings::PerformanceMetric;
