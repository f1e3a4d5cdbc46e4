//! Settings type definitions.
//!
//! Field names are snake_case in JSON. Every section implements [`Default`]
//! with production values and is `#[serde(default)]`, so a partial file only
//! needs the keys it changes.

mod breakpoints;
mod monitor;
mod retention;
mod runtime;

pub use breakpoints::*;
pub use monitor::*;
pub use retention::*;
pub use runtime::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings.
///
/// ```json
/// {
///   "breakpoints": { "max_paused_traces": 4 },
///   "circuit_breakers": { "tracing": { "failure_threshold": 5 } }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightlineSettings {
    /// Logging.
    pub logging: LoggingSettings,
    /// Trace store.
    pub store: StoreSettings,
    /// Trace logger.
    pub tracer: TracerSettings,
    /// Breakpoints.
    pub breakpoints: BreakpointSettings,
    /// Circuit breakers by name.
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSettings>,
    /// Performance monitor.
    pub monitor: MonitorSettings,
    /// Retention jobs.
    pub retention: RetentionSettings,
}

impl Default for SightlineSettings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            store: StoreSettings::default(),
            tracer: TracerSettings::default(),
            breakpoints: BreakpointSettings::default(),
            circuit_breakers: default_breakers(),
            monitor: MonitorSettings::default(),
            retention: RetentionSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = SightlineSettings::default();
        assert!(s.breakpoints.enable_breakpoints);
        assert_eq!(s.breakpoints.default_timeout_minutes, 30);
        assert_eq!(s.breakpoints.max_breakpoints, 50);
        assert_eq!(s.breakpoints.max_paused_traces, 10);
        assert_eq!(s.circuit_breakers["tracing"], CircuitBreakerSettings::new(3, 30.0, 2, 2.0));
        assert_eq!(s.circuit_breakers["database"].recovery_timeout_seconds, 15.0);
        assert_eq!(s.monitor.thresholds.len(), 5);
        assert_eq!(s.retention.rules.len(), 6);
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_value(SightlineSettings::default()).unwrap();
        assert_eq!(json["breakpoints"]["max_paused_traces"], 10);
        assert_eq!(json["monitor"]["thresholds"][1]["metric"], "throughput");
        assert_eq!(json["retention"]["rules"][0]["category"], "trace_events");
        assert_eq!(json["retention"]["rules"][0]["policy"], "medium_term");
    }

    #[test]
    fn rule_compress_defaults_to_true() {
        let rule: RetentionRule = serde_json::from_str(
            r#"{"category": "error_logs", "policy": "long_term", "retention_days": 10}"#,
        )
        .unwrap();
        assert!(rule.compress);
        assert_eq!(rule.archive_after_days, None);
    }

    #[test]
    fn rule_deletion_by_policy() {
        let keep = RetentionRule::new(DataCategory::SecurityAudit, RetentionPolicy::Permanent, 30, None, true);
        assert!(!keep.deletes());
        let never = RetentionRule::new(DataCategory::TraceEvents, RetentionPolicy::LongTerm, -1, None, true);
        assert!(!never.deletes());
        let now = RetentionRule::new(DataCategory::AnalyticsCache, RetentionPolicy::Immediate, 0, None, false);
        assert!(now.deletes());
    }

    #[test]
    fn metric_parses_from_str() {
        assert_eq!("trace_overhead".parse::<PerformanceMetric>().unwrap(), PerformanceMetric::TraceOverhead);
        assert!("latency".parse::<PerformanceMetric>().is_err());
        assert!(PerformanceMetric::Throughput.alerts_below());
        assert!(!PerformanceMetric::ErrorRate.alerts_below());
    }
}
