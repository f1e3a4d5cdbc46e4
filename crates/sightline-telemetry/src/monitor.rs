//! Rolling-window performance monitor with threshold alerts.
//!
//! Each metric keeps a bounded ring buffer of samples. Every
//! [`PerformanceMonitor::record_metric`] call recomputes the aggregate over
//! the metric's window (mean, or count per second for throughput) and
//! compares it with the warning and critical levels. Alerts of the same
//! metric and severity are suppressed for the cooldown period. Subscribers
//! are invoked after the monitor's lock is released, so a subscriber may
//! call back into the monitor.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use sightline_settings::{MonitorSettings, PerformanceMetric, ThresholdSettings};
use tracing::warn;

/// Window used by [`PerformanceMonitor::current_metrics`].
pub const CURRENT_WINDOW: Duration = Duration::from_secs(300);

/// Callback invoked for every raised alert.
pub type AlertCallback = Arc<dyn Fn(&PerformanceAlert) + Send + Sync>;

/// Alert level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Warning threshold crossed.
    Warning,
    /// Critical threshold crossed.
    Critical,
}

impl AlertSeverity {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A threshold breach.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceAlert {
    /// Monotonic alert number within this monitor.
    pub alert_id: u64,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Metric that breached.
    pub metric: PerformanceMetric,
    /// Level crossed.
    pub severity: AlertSeverity,
    /// Aggregate value that breached.
    pub current_value: f64,
    /// Threshold that was crossed.
    pub threshold: f64,
    /// Human-readable summary.
    pub message: String,
    /// Context of the sample that triggered the check.
    pub context: Map<String, Value>,
}

/// Aggregate view of one metric over a window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Metric.
    pub metric: PerformanceMetric,
    /// Samples in the window.
    pub samples: usize,
    /// Most recent value.
    pub current: f64,
    /// Mean.
    pub average: f64,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Time of the most recent sample.
    pub last_updated: DateTime<Utc>,
}

/// One sample in a trend series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    /// When recorded.
    pub timestamp: DateTime<Utc>,
    /// Value.
    pub value: f64,
    /// Caller-supplied context.
    pub context: Option<Map<String, Value>>,
}

#[derive(Debug)]
struct Sample {
    value: f64,
    at: Instant,
    recorded_at: DateTime<Utc>,
    context: Option<Map<String, Value>>,
}

#[derive(Default)]
struct MonitorState {
    samples: HashMap<PerformanceMetric, VecDeque<Sample>>,
    alerts: VecDeque<PerformanceAlert>,
    last_alert: HashMap<(PerformanceMetric, AlertSeverity), Instant>,
    next_alert_id: u64,
}

/// Records metric samples and raises threshold alerts.
pub struct PerformanceMonitor {
    settings: MonitorSettings,
    thresholds: HashMap<PerformanceMetric, ThresholdSettings>,
    state: Mutex<MonitorState>,
    subscribers: RwLock<Vec<AlertCallback>>,
}

impl PerformanceMonitor {
    /// A monitor with no samples.
    pub fn new(settings: MonitorSettings) -> Self {
        let thresholds = settings.thresholds.iter().map(|t| (t.metric, t.clone())).collect();
        Self {
            settings,
            thresholds,
            state: Mutex::new(MonitorState::default()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register an alert subscriber.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&PerformanceAlert) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(callback));
    }

    /// Record a sample and check its thresholds. Returns the alert raised, if any.
    pub fn record_metric(
        &self,
        metric: PerformanceMetric,
        value: f64,
        context: Option<Map<String, Value>>,
    ) -> Option<PerformanceAlert> {
        if !self.settings.enabled || !value.is_finite() {
            return None;
        }

        let alert = {
            let mut state = self.state.lock();
            let buffer = state.samples.entry(metric).or_default();
            buffer.push_back(Sample {
                value,
                at: Instant::now(),
                recorded_at: Utc::now(),
                context: context.clone(),
            });
            while buffer.len() > self.settings.max_samples_per_metric {
                let _ = buffer.pop_front();
            }
            self.check_thresholds(&mut state, metric, context.unwrap_or_default())
        };

        if let Some(alert) = &alert {
            warn!(
                metric = %alert.metric,
                severity = alert.severity.as_str(),
                value = alert.current_value,
                threshold = alert.threshold,
                "performance alert: {}",
                alert.message
            );
            let subscribers = self.subscribers.read().clone();
            for subscriber in subscribers {
                subscriber(alert);
            }
        }
        alert
    }

    fn check_thresholds(
        &self,
        state: &mut MonitorState,
        metric: PerformanceMetric,
        context: Map<String, Value>,
    ) -> Option<PerformanceAlert> {
        let threshold = self.thresholds.get(&metric)?;
        let window = secs(threshold.window_seconds);
        let values = window_values(state.samples.get(&metric)?, window);
        if values.len() < threshold.min_samples {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let current = if metric.alerts_below() {
            values.len() as f64 / threshold.window_seconds
        } else {
            mean(&values)
        };
        let breaches = |level: f64| {
            if metric.alerts_below() { current < level } else { current > level }
        };
        let (severity, level) = if breaches(threshold.critical) {
            (AlertSeverity::Critical, threshold.critical)
        } else if breaches(threshold.warning) {
            (AlertSeverity::Warning, threshold.warning)
        } else {
            return None;
        };

        let key = (metric, severity);
        let cooldown = secs(self.settings.alert_cooldown_seconds);
        if state.last_alert.get(&key).is_some_and(|at| at.elapsed() < cooldown) {
            return None;
        }
        let _ = state.last_alert.insert(key, Instant::now());

        state.next_alert_id += 1;
        let direction = if metric.alerts_below() { "below" } else { "exceeds" };
        let alert = PerformanceAlert {
            alert_id: state.next_alert_id,
            timestamp: Utc::now(),
            metric,
            severity,
            current_value: current,
            threshold: level,
            message: format!(
                "{metric} {}: {current:.3} {direction} threshold {level:.3}",
                severity.as_str()
            ),
            context,
        };
        state.alerts.push_back(alert.clone());
        while state.alerts.len() > self.settings.max_alerts {
            let _ = state.alerts.pop_front();
        }
        Some(alert)
    }

    /// Summary of `metric` over the last `window`.
    pub fn metric_summary(&self, metric: PerformanceMetric, window: Duration) -> Option<MetricSummary> {
        let state = self.state.lock();
        let buffer = state.samples.get(&metric)?;
        let recent: Vec<&Sample> = buffer.iter().filter(|s| s.at.elapsed() <= window).collect();
        let last = recent.last()?;
        let mut values: Vec<f64> = recent.iter().map(|s| s.value).collect();
        let current = last.value;
        let last_updated = last.recorded_at;
        values.sort_by(f64::total_cmp);
        Some(MetricSummary {
            metric,
            samples: values.len(),
            current,
            average: mean(&values),
            min: values[0],
            max: values[values.len() - 1],
            p50: values[percentile_index(values.len(), 0.50)],
            p95: values[percentile_index(values.len(), 0.95)],
            p99: values[percentile_index(values.len(), 0.99)],
            last_updated,
        })
    }

    /// Mean of `metric` over the last `window`.
    pub fn mean(&self, metric: PerformanceMetric, window: Duration) -> Option<f64> {
        let state = self.state.lock();
        let values = window_values(state.samples.get(&metric)?, window);
        (!values.is_empty()).then(|| mean(&values))
    }

    /// Summaries of every metric with samples in the last five minutes.
    pub fn current_metrics(&self) -> BTreeMap<PerformanceMetric, MetricSummary> {
        PerformanceMetric::ALL
            .into_iter()
            .filter_map(|m| self.metric_summary(m, CURRENT_WINDOW).map(|s| (m, s)))
            .collect()
    }

    /// Raw samples of every metric over the last `window`, oldest first.
    pub fn performance_trends(&self, window: Duration) -> BTreeMap<PerformanceMetric, Vec<TrendPoint>> {
        let state = self.state.lock();
        state
            .samples
            .iter()
            .map(|(metric, buffer)| {
                let points: Vec<TrendPoint> = buffer
                    .iter()
                    .filter(|s| s.at.elapsed() <= window)
                    .map(|s| TrendPoint {
                        timestamp: s.recorded_at,
                        value: s.value,
                        context: s.context.clone(),
                    })
                    .collect();
                (*metric, points)
            })
            .filter(|(_, points)| !points.is_empty())
            .collect()
    }

    /// The most recent `limit` alerts, oldest first.
    pub fn alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        let state = self.state.lock();
        let skip = state.alerts.len().saturating_sub(limit);
        state.alerts.iter().skip(skip).cloned().collect()
    }

    /// Drop all alerts and cooldowns.
    pub fn clear_alerts(&self) {
        let mut state = self.state.lock();
        state.alerts.clear();
        state.last_alert.clear();
    }

    /// Samples currently buffered for `metric`.
    pub fn sample_count(&self, metric: PerformanceMetric) -> usize {
        self.state.lock().samples.get(&metric).map_or(0, VecDeque::len)
    }
}

fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

fn window_values(buffer: &VecDeque<Sample>, window: Duration) -> Vec<f64> {
    buffer
        .iter()
        .rev()
        .take_while(|s| s.at.elapsed() <= window)
        .map(|s| s.value)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn percentile_index(len: usize, percentile: f64) -> usize {
    if len <= 1 {
        return 0;
    }
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let rank = ((len - 1) as f64 * percentile).round() as usize;
    rank.min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> MonitorSettings {
        MonitorSettings::default()
    }

    fn feed(monitor: &PerformanceMonitor, metric: PerformanceMetric, value: f64, n: usize) -> Vec<PerformanceAlert> {
        (0..n).filter_map(|_| monitor.record_metric(metric, value, None)).collect()
    }

    #[test]
    fn no_alert_below_min_samples() {
        let monitor = PerformanceMonitor::new(settings());
        let alerts = feed(&monitor, PerformanceMetric::ResponseTime, 10.0, 9);
        assert!(alerts.is_empty());
        assert_eq!(monitor.sample_count(PerformanceMetric::ResponseTime), 9);
    }

    #[test]
    fn critical_latency_alert_then_cooldown() {
        let monitor = PerformanceMonitor::new(settings());
        let alerts = feed(&monitor, PerformanceMetric::ResponseTime, 6.0, 15);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].threshold, 5.0);
        assert!(alerts[0].message.contains("response_time critical"));
        assert_eq!(monitor.alerts(10).len(), 1);
    }

    #[test]
    fn warning_when_between_levels() {
        let monitor = PerformanceMonitor::new(settings());
        let alerts = feed(&monitor, PerformanceMetric::ErrorRate, 0.07, 10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn healthy_values_do_not_alert() {
        let monitor = PerformanceMonitor::new(settings());
        assert!(feed(&monitor, PerformanceMetric::TraceOverhead, 0.01, 20).is_empty());
    }

    #[test]
    fn throughput_alerts_when_low() {
        let monitor = PerformanceMonitor::new(settings());
        // 10 samples over a 60s window is ~0.17/s, below both levels.
        let alerts = feed(&monitor, PerformanceMetric::Throughput, 1.0, 10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert!(alerts[0].message.contains("below"));
    }

    #[test]
    fn cooldown_is_per_severity() {
        let mut s = settings();
        s.thresholds = vec![ThresholdSettings {
            metric: PerformanceMetric::ResponseTime,
            warning: 1.0,
            critical: 5.0,
            window_seconds: 60.0,
            min_samples: 1,
        }];
        let monitor = PerformanceMonitor::new(s);
        assert_eq!(
            monitor.record_metric(PerformanceMetric::ResponseTime, 2.0, None).map(|a| a.severity),
            Some(AlertSeverity::Warning)
        );
        assert!(monitor.record_metric(PerformanceMetric::ResponseTime, 2.0, None).is_none());
        // Mean of (2, 2, 20) = 8 crosses critical, which has its own cooldown.
        assert_eq!(
            monitor.record_metric(PerformanceMetric::ResponseTime, 20.0, None).map(|a| a.severity),
            Some(AlertSeverity::Critical)
        );
        monitor.clear_alerts();
        assert!(monitor.alerts(10).is_empty());
        assert!(monitor.record_metric(PerformanceMetric::ResponseTime, 20.0, None).is_some());
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut s = settings();
        s.max_samples_per_metric = 5;
        let monitor = PerformanceMonitor::new(s);
        let _ = feed(&monitor, PerformanceMetric::CpuUsage, 0.5, 12);
        assert_eq!(monitor.sample_count(PerformanceMetric::CpuUsage), 5);
    }

    #[test]
    fn alert_list_is_bounded() {
        let mut s = settings();
        s.max_alerts = 2;
        s.alert_cooldown_seconds = 0.0;
        s.thresholds = vec![ThresholdSettings {
            metric: PerformanceMetric::MemoryUsage,
            warning: 0.8,
            critical: 0.9,
            window_seconds: 60.0,
            min_samples: 1,
        }];
        let monitor = PerformanceMonitor::new(s);
        let raised = feed(&monitor, PerformanceMetric::MemoryUsage, 0.95, 5);
        assert_eq!(raised.len(), 5);
        let kept = monitor.alerts(10);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].alert_id, 5);
    }

    #[test]
    fn subscribers_receive_alerts_and_may_reenter() {
        let monitor = Arc::new(PerformanceMonitor::new(settings()));
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            let weak = Arc::downgrade(&monitor);
            monitor.subscribe(move |alert| {
                assert_eq!(alert.metric, PerformanceMetric::ResponseTime);
                let _ = hits.fetch_add(1, Ordering::SeqCst);
                if let Some(m) = weak.upgrade() {
                    let _ = m.alerts(1);
                }
            });
        }
        let _ = feed(&monitor, PerformanceMetric::ResponseTime, 9.0, 10);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn summary_statistics() {
        let monitor = PerformanceMonitor::new(settings());
        for v in 1..=100 {
            let _ = monitor.record_metric(PerformanceMetric::CpuUsage, f64::from(v), None);
        }
        let summary = monitor.metric_summary(PerformanceMetric::CpuUsage, CURRENT_WINDOW).unwrap();
        assert_eq!(summary.samples, 100);
        assert_eq!(summary.current, 100.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 100.0);
        assert!((summary.average - 50.5).abs() < 1e-9);
        assert_eq!(summary.p50, 51.0);
        assert_eq!(summary.p99, 99.0);
        assert!(monitor.current_metrics().contains_key(&PerformanceMetric::CpuUsage));
        assert!(monitor.metric_summary(PerformanceMetric::Throughput, CURRENT_WINDOW).is_none());
    }

    #[test]
    fn trends_carry_context() {
        let monitor = PerformanceMonitor::new(settings());
        let mut ctx = Map::new();
        let _ = ctx.insert("trace_id".into(), Value::from("t1"));
        let _ = monitor.record_metric(PerformanceMetric::ResponseTime, 0.2, Some(ctx));
        let trends = monitor.performance_trends(Duration::from_secs(3600));
        let points = &trends[&PerformanceMetric::ResponseTime];
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].context.as_ref().unwrap()["trace_id"], "t1");
    }

    #[test]
    fn disabled_monitor_records_nothing() {
        let mut s = settings();
        s.enabled = false;
        let monitor = PerformanceMonitor::new(s);
        assert!(monitor.record_metric(PerformanceMetric::ResponseTime, 99.0, None).is_none());
        assert_eq!(monitor.sample_count(PerformanceMetric::ResponseTime), 0);
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let monitor = PerformanceMonitor::new(settings());
        assert!(monitor.record_metric(PerformanceMetric::ResponseTime, f64::NAN, None).is_none());
        assert_eq!(monitor.sample_count(PerformanceMetric::ResponseTime), 0);
    }
}
