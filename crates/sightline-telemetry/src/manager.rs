//! Breaker registry, alert feedback loop and health scoring.
//!
//! [`PerformanceManager`] owns the [`PerformanceMonitor`] and one
//! [`CircuitBreaker`] per protected operation class. Critical alerts on
//! response time or trace overhead force the `tracing` breaker open, so
//! recording stops before the pipeline's latency degrades further.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use sightline_settings::{
    CircuitBreakerSettings, MonitorSettings, PerformanceMetric, TRACING_BREAKER, default_breakers,
};
use tracing::warn;

use crate::breaker::{BreakerStats, CircuitBreaker, CircuitState};
use crate::errors::BreakerError;
use crate::monitor::{
    AlertSeverity, CURRENT_WINDOW, MetricSummary, PerformanceAlert, PerformanceMonitor,
};

/// Receives alerts for delivery (email, webhook, chat). Delivery itself is
/// the sink's concern.
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. Must not block for long.
    fn deliver(&self, alert: &PerformanceAlert);
}

/// Overall health band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Score 90 and above.
    Excellent,
    /// 75 to 89.
    Good,
    /// 50 to 74.
    Fair,
    /// 25 to 49.
    Poor,
    /// Below 25.
    Critical,
}

impl HealthStatus {
    /// Band for `score`.
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::Excellent,
            75..=89 => Self::Good,
            50..=74 => Self::Fair,
            25..=49 => Self::Poor,
            _ => Self::Critical,
        }
    }
}

/// Health report.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    /// 0 to 100.
    pub score: u32,
    /// Band for the score.
    pub status: HealthStatus,
    /// Every breaker's counters.
    pub breakers: Vec<BreakerStats>,
    /// Current metric summaries.
    pub metrics: BTreeMap<PerformanceMetric, MetricSummary>,
    /// Alerts currently retained.
    pub recent_alerts: usize,
}

/// Monitor plus named breakers.
pub struct PerformanceManager {
    monitor: Arc<PerformanceMonitor>,
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
}

impl PerformanceManager {
    /// Build the monitor and breakers and wire the feedback loop. The
    /// `tracing`, `analytics` and `database` breakers always exist;
    /// `breakers` overrides or extends them.
    pub fn new(monitor: MonitorSettings, breakers: &BTreeMap<String, CircuitBreakerSettings>) -> Self {
        let mut configs = default_breakers();
        configs.extend(breakers.iter().map(|(k, v)| (k.clone(), v.clone())));
        let breakers: BTreeMap<String, Arc<CircuitBreaker>> = configs
            .into_iter()
            .map(|(name, config)| {
                let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
                (name, breaker)
            })
            .collect();

        let monitor = Arc::new(PerformanceMonitor::new(monitor));
        if let Some(tracing_breaker) = breakers.get(TRACING_BREAKER) {
            let tracing_breaker = Arc::clone(tracing_breaker);
            monitor.subscribe(move |alert| {
                let guards_latency = matches!(
                    alert.metric,
                    PerformanceMetric::ResponseTime | PerformanceMetric::TraceOverhead
                );
                if guards_latency && alert.severity == AlertSeverity::Critical {
                    warn!(metric = %alert.metric, "critical alert, suspending tracing");
                    tracing_breaker.force_open();
                }
            });
        }

        Self { monitor, breakers }
    }

    /// Defaults for everything.
    pub fn with_defaults() -> Self {
        Self::new(MonitorSettings::default(), &BTreeMap::new())
    }

    /// The monitor.
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Forward alerts to an external sink.
    pub fn add_alert_sink(&self, sink: Arc<dyn AlertSink>) {
        self.monitor.subscribe(move |alert| sink.deliver(alert));
    }

    /// Shorthand for [`PerformanceMonitor::record_metric`].
    pub fn record_metric(
        &self,
        metric: PerformanceMetric,
        value: f64,
        context: Option<Map<String, Value>>,
    ) -> Option<PerformanceAlert> {
        self.monitor.record_metric(metric, value, context)
    }

    /// Breaker by name.
    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    /// Names of all breakers.
    pub fn breaker_names(&self) -> impl Iterator<Item = &str> {
        self.breakers.keys().map(String::as_str)
    }

    /// Run `f` under the named breaker, or unprotected if no such breaker exists.
    pub fn execute_with_protection<T, E, F>(&self, name: &str, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        match self.breakers.get(name) {
            Some(breaker) => breaker.call(f),
            None => f().map_err(BreakerError::Inner),
        }
    }

    /// Score the system from breaker states and recent metrics.
    pub fn health(&self) -> HealthReport {
        let breakers: Vec<BreakerStats> = self.breakers.values().map(|b| b.stats()).collect();
        let mut score: i64 = 100;
        for stats in &breakers {
            score -= match stats.state {
                CircuitState::Open => 20,
                CircuitState::HalfOpen => 10,
                CircuitState::Closed => 0,
            };
        }

        let window = CURRENT_WINDOW;
        if let Some(error_rate) = self.monitor.mean(PerformanceMetric::ErrorRate, window) {
            if error_rate > 0.1 {
                score -= 15;
            } else if error_rate > 0.05 {
                score -= 5;
            }
        }
        if let Some(latency) = self.monitor.mean(PerformanceMetric::ResponseTime, window) {
            if latency > 5.0 {
                score -= 15;
            } else if latency > 1.0 {
                score -= 5;
            }
        }

        let score = u32::try_from(score.clamp(0, 100)).unwrap_or(0);
        HealthReport {
            score,
            status: HealthStatus::from_score(score),
            breakers,
            metrics: self.monitor.current_metrics(),
            recent_alerts: self.monitor.alerts(usize::MAX).len(),
        }
    }

    /// Samples of every metric over the last `window`.
    pub fn trends(&self, window: Duration) -> BTreeMap<PerformanceMetric, Vec<crate::monitor::TrendPoint>> {
        self.monitor.performance_trends(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<PerformanceAlert>>);

    impl AlertSink for RecordingSink {
        fn deliver(&self, alert: &PerformanceAlert) {
            self.0.lock().push(alert.clone());
        }
    }

    #[test]
    fn default_breakers_exist() {
        let manager = PerformanceManager::with_defaults();
        let names: Vec<&str> = manager.breaker_names().collect();
        assert_eq!(names, vec!["analytics", "database", "tracing"]);
        let tracing = manager.breaker("tracing").unwrap();
        assert_eq!(tracing.config().failure_threshold, 3);
        assert_eq!(tracing.config().timeout_seconds, 2.0);
        assert!(manager.breaker("nope").is_none());
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = BTreeMap::from([
            ("tracing".to_string(), CircuitBreakerSettings::new(9, 1.0, 1, 1.0)),
            ("export".to_string(), CircuitBreakerSettings::default()),
        ]);
        let manager = PerformanceManager::new(MonitorSettings::default(), &overrides);
        assert_eq!(manager.breaker("tracing").unwrap().config().failure_threshold, 9);
        assert!(manager.breaker("export").is_some());
        assert!(manager.breaker("database").is_some());
    }

    #[test]
    fn critical_latency_forces_tracing_open() {
        let manager = PerformanceManager::with_defaults();
        for _ in 0..10 {
            let _ = manager.record_metric(PerformanceMetric::ResponseTime, 8.0, None);
        }
        assert_eq!(manager.breaker("tracing").unwrap().state(), CircuitState::Open);
        assert_eq!(manager.breaker("database").unwrap().state(), CircuitState::Closed);
    }

    #[test]
    fn warning_does_not_trip_tracing() {
        let manager = PerformanceManager::with_defaults();
        for _ in 0..10 {
            let _ = manager.record_metric(PerformanceMetric::TraceOverhead, 0.07, None);
        }
        assert_eq!(manager.breaker("tracing").unwrap().state(), CircuitState::Closed);
    }

    #[test]
    fn critical_error_rate_leaves_tracing_alone() {
        let manager = PerformanceManager::with_defaults();
        for _ in 0..10 {
            let _ = manager.record_metric(PerformanceMetric::ErrorRate, 1.0, None);
        }
        assert_eq!(manager.breaker("tracing").unwrap().state(), CircuitState::Closed);
    }

    #[test]
    fn alert_sink_receives_alerts() {
        let manager = PerformanceManager::with_defaults();
        let sink = Arc::new(RecordingSink::default());
        manager.add_alert_sink(sink.clone());
        for _ in 0..10 {
            let _ = manager.record_metric(PerformanceMetric::ErrorRate, 0.5, None);
        }
        let delivered = sink.0.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].metric, PerformanceMetric::ErrorRate);
    }

    #[test]
    fn execute_with_protection_routes_by_name() {
        let manager = PerformanceManager::with_defaults();
        let ok: Result<u8, BreakerError<&str>> = manager.execute_with_protection("database", || Ok(1));
        assert_eq!(ok.unwrap(), 1);

        manager.breaker("database").unwrap().force_open();
        let rejected: Result<u8, BreakerError<&str>> = manager.execute_with_protection("database", || Ok(1));
        assert_matches!(rejected, Err(BreakerError::CircuitOpen { .. }));

        let unprotected: Result<u8, BreakerError<&str>> =
            manager.execute_with_protection("unknown", || Err("bad"));
        assert_matches!(unprotected, Err(BreakerError::Inner("bad")));
    }

    #[test]
    fn health_score_bands() {
        let manager = PerformanceManager::with_defaults();
        let report = manager.health();
        assert_eq!(report.score, 100);
        assert_eq!(report.status, HealthStatus::Excellent);
        assert_eq!(report.breakers.len(), 3);

        manager.breaker("database").unwrap().force_open();
        for _ in 0..3 {
            let _ = manager.record_metric(PerformanceMetric::ErrorRate, 0.2, None);
            let _ = manager.record_metric(PerformanceMetric::ResponseTime, 2.0, None);
        }
        // 100 - 20 (open) - 15 (error rate) - 5 (latency)
        let report = manager.health();
        assert_eq!(report.score, 60);
        assert_eq!(report.status, HealthStatus::Fair);
    }

    #[test]
    fn status_from_score() {
        assert_eq!(HealthStatus::from_score(95), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(75), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Fair);
        assert_eq!(HealthStatus::from_score(25), HealthStatus::Poor);
        assert_eq!(HealthStatus::from_score(0), HealthStatus::Critical);
    }
}
