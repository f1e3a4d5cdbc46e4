use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A metric the performance monitor tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    /// End-to-end trace latency in seconds.
    ResponseTime,
    /// Completed traces; aggregated as count per window second.
    Throughput,
    /// 1.0 for a failed trace, 0.0 for a successful one.
    ErrorRate,
    /// Fraction of memory in use.
    MemoryUsage,
    /// Fraction of CPU in use.
    CpuUsage,
    /// Fraction of trace time spent inside the tracer.
    TraceOverhead,
}

impl PerformanceMetric {
    /// Every metric, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::ResponseTime,
        Self::Throughput,
        Self::ErrorRate,
        Self::MemoryUsage,
        Self::CpuUsage,
        Self::TraceOverhead,
    ];

    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResponseTime => "response_time",
            Self::Throughput => "throughput",
            Self::ErrorRate => "error_rate",
            Self::MemoryUsage => "memory_usage",
            Self::CpuUsage => "cpu_usage",
            Self::TraceOverhead => "trace_overhead",
        }
    }

    /// Whether breaching means falling below the threshold.
    pub fn alerts_below(self) -> bool {
        self == Self::Throughput
    }
}

impl std::fmt::Display for PerformanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PerformanceMetric {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

/// Warning/critical thresholds for one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSettings {
    /// Metric the thresholds apply to.
    pub metric: PerformanceMetric,
    /// Warning level.
    pub warning: f64,
    /// Critical level.
    pub critical: f64,
    /// Rolling window the aggregate is computed over.
    pub window_seconds: f64,
    /// Samples required in the window before alerting.
    pub min_samples: usize,
}

impl ThresholdSettings {
    fn new(metric: PerformanceMetric, warning: f64, critical: f64, window_seconds: f64) -> Self {
        Self { metric, warning, critical, window_seconds, min_samples: 10 }
    }
}

/// Performance monitor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Whether samples are recorded at all.
    pub enabled: bool,
    /// Ring buffer size per metric.
    pub max_samples_per_metric: usize,
    /// Minimum gap between alerts of the same metric and severity.
    pub alert_cooldown_seconds: f64,
    /// Maximum retained alerts.
    pub max_alerts: usize,
    /// Per-metric thresholds.
    pub thresholds: Vec<ThresholdSettings>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        use PerformanceMetric as M;
        Self {
            enabled: true,
            max_samples_per_metric: 10_000,
            alert_cooldown_seconds: 300.0,
            max_alerts: 1000,
            thresholds: vec![
                ThresholdSettings::new(M::ResponseTime, 1.0, 5.0, 60.0),
                ThresholdSettings::new(M::Throughput, 10.0, 5.0, 60.0),
                ThresholdSettings::new(M::ErrorRate, 0.05, 0.10, 300.0),
                ThresholdSettings::new(M::MemoryUsage, 0.80, 0.90, 60.0),
                ThresholdSettings::new(M::TraceOverhead, 0.05, 0.10, 60.0),
            ],
        }
    }
}

/// Circuit breaker tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits before probing.
    pub recovery_timeout_seconds: f64,
    /// Probe successes needed to close again.
    pub success_threshold: u32,
    /// Calls slower than this count as failures.
    pub timeout_seconds: f64,
}

impl CircuitBreakerSettings {
    /// Build from the four tuning values.
    pub fn new(
        failure_threshold: u32,
        recovery_timeout_seconds: f64,
        success_threshold: u32,
        timeout_seconds: f64,
    ) -> Self {
        Self { failure_threshold, recovery_timeout_seconds, success_threshold, timeout_seconds }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self::new(5, 60.0, 3, 30.0)
    }
}

/// Name of the breaker guarding event recording.
pub const TRACING_BREAKER: &str = "tracing";
/// Name of the breaker guarding analytics queries.
pub const ANALYTICS_BREAKER: &str = "analytics";
/// Name of the breaker guarding store writes.
pub const DATABASE_BREAKER: &str = "database";

/// The breakers every deployment starts with.
pub fn default_breakers() -> BTreeMap<String, CircuitBreakerSettings> {
    BTreeMap::from([
        (TRACING_BREAKER.to_string(), CircuitBreakerSettings::new(3, 30.0, 2, 2.0)),
        (ANALYTICS_BREAKER.to_string(), CircuitBreakerSettings::new(5, 60.0, 3, 10.0)),
        (DATABASE_BREAKER.to_string(), CircuitBreakerSettings::new(3, 15.0, 2, 5.0)),
    ])
}
