//! Load-time validation.

use std::collections::HashSet;

use crate::errors::{Result, SettingsError};
use crate::types::{MAX_PAUSE_TIMEOUT_MINUTES, PerformanceMetric, SightlineSettings};

fn invalid(message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(message.into())
}

fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn non_negative(x: f64) -> bool {
    x.is_finite() && x >= 0.0
}

/// Reject settings that would make a component misbehave.
pub fn validate(settings: &SightlineSettings) -> Result<()> {
    if settings.logging.level.trim().is_empty() {
        return Err(invalid("logging.level must not be empty"));
    }
    if settings.store.pool_size == 0 {
        return Err(invalid("store.pool_size must be at least 1"));
    }
    if settings.store.event_batch_size == 0 {
        return Err(invalid("store.event_batch_size must be at least 1"));
    }
    if settings.tracer.persist_queue_capacity == 0 {
        return Err(invalid("tracer.persist_queue_capacity must be at least 1"));
    }

    let bp = &settings.breakpoints;
    if bp.max_breakpoints == 0 {
        return Err(invalid("breakpoints.max_breakpoints must be at least 1"));
    }
    if bp.max_paused_traces == 0 {
        return Err(invalid("breakpoints.max_paused_traces must be at least 1"));
    }
    if !(1..=MAX_PAUSE_TIMEOUT_MINUTES).contains(&bp.default_timeout_minutes) {
        return Err(invalid(format!(
            "breakpoints.default_timeout_minutes must be between 1 and {MAX_PAUSE_TIMEOUT_MINUTES}"
        )));
    }
    if !positive(bp.condition_timeout_seconds) {
        return Err(invalid("breakpoints.condition_timeout_seconds must be positive"));
    }
    if bp.hit_history_limit == 0 || bp.sweep_interval_seconds == 0 {
        return Err(invalid("breakpoints.hit_history_limit and sweep_interval_seconds must be at least 1"));
    }

    for (name, breaker) in &settings.circuit_breakers {
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(invalid(format!("circuit_breakers.{name}: thresholds must be at least 1")));
        }
        if !non_negative(breaker.recovery_timeout_seconds) || !positive(breaker.timeout_seconds) {
            return Err(invalid(format!(
                "circuit_breakers.{name}: recovery_timeout_seconds must be >= 0 and timeout_seconds > 0"
            )));
        }
    }

    let monitor = &settings.monitor;
    if monitor.max_samples_per_metric == 0 || monitor.max_alerts == 0 {
        return Err(invalid("monitor.max_samples_per_metric and max_alerts must be at least 1"));
    }
    let mut seen_metrics = HashSet::new();
    for t in &monitor.thresholds {
        if !seen_metrics.insert(t.metric) {
            return Err(invalid(format!("monitor.thresholds: duplicate metric {}", t.metric)));
        }
        if !positive(t.window_seconds) {
            return Err(invalid(format!("monitor.thresholds.{}: window_seconds must be positive", t.metric)));
        }
        let ordered = if t.metric == PerformanceMetric::Throughput {
            t.critical <= t.warning
        } else {
            t.warning <= t.critical
        };
        if !ordered {
            return Err(invalid(format!(
                "monitor.thresholds.{}: critical must be beyond warning",
                t.metric
            )));
        }
    }

    let retention = &settings.retention;
    if retention.cleanup_interval_hours == 0 || retention.archive_interval_hours == 0 {
        return Err(invalid("retention intervals must be at least 1 hour"));
    }
    let mut seen_categories = HashSet::new();
    for rule in &retention.rules {
        if !seen_categories.insert(rule.category) {
            return Err(invalid(format!("retention.rules: duplicate category {}", rule.category)));
        }
        if let Some(archive_days) = rule.archive_after_days {
            if archive_days < 0 {
                return Err(invalid(format!("retention.rules.{}: archive_after_days must be >= 0", rule.category)));
            }
            if rule.retention_days > 0 && archive_days > rule.retention_days {
                return Err(invalid(format!(
                    "retention.rules.{}: archive_after_days exceeds retention_days",
                    rule.category
                )));
            }
        }
    }

    Ok(())
}
