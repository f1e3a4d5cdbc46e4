//! Circuit breaker.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ─────────────────────────────────────────▶ OPEN
//!     ▲                                                │ recovery timeout
//!     │ success_threshold probe successes              ▼
//!     └──────────────────────────────────────────── HALF_OPEN
//!                      any probe failure ──▶ OPEN
//! ```
//!
//! A call that outlives `timeout_seconds` is a failure even when it
//! returned `Ok`; the caller gets [`BreakerError::OperationTimeout`].
//! While half-open only one probe runs at a time; concurrent callers are
//! rejected as if the breaker were open.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sightline_settings::CircuitBreakerSettings;
use tracing::{info, warn};

use crate::errors::BreakerError;

/// Externally visible breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// A probe call is allowed.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name for logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time breaker counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures while closed, or the failure that reopened it.
    pub failure_count: u32,
    /// Probe successes while half-open.
    pub success_count: u32,
    /// Calls attempted, including rejected ones.
    pub total_calls: u64,
    /// Calls that completed successfully.
    pub total_successes: u64,
    /// Calls that failed or timed out.
    pub total_failures: u64,
    /// Calls rejected without running.
    pub total_rejections: u64,
    /// Calls that ran past the limit.
    pub total_timeouts: u64,
    /// Wall-clock time of the last failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the last success.
    pub last_success_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: u32,
    success_count: u32,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    total_timeouts: u64,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
}

impl Inner {
    fn public_state(&self) -> CircuitState {
        match self.state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Counts a call that unwinds as a failure, so a half-open probe never
/// stays in flight forever.
struct UnwindGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl UnwindGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(breaker = %self.breaker.name, "protected call panicked");
            self.breaker.on_failure(false);
        }
    }
}

/// One breaker guarding a class of operations.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// A closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                total_calls: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
                total_timeouts: 0,
                last_failure_time: None,
                last_success_time: None,
            }),
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tuning values.
    pub fn config(&self) -> &CircuitBreakerSettings {
        &self.config
    }

    /// Current state. An open breaker whose recovery window has passed still
    /// reports open until the next call probes it.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().public_state()
    }

    /// Whether a call made now would be let through, without counting it.
    pub fn would_admit(&self) -> bool {
        match self.inner.lock().state {
            State::Closed | State::HalfOpen { probe_in_flight: false } => true,
            State::Open { since } => since.elapsed() >= self.recovery(),
            State::HalfOpen { probe_in_flight: true } => false,
        }
    }

    /// Run `f` under the breaker.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.admit::<E>()?;

        let started = Instant::now();
        let unwind = UnwindGuard { breaker: self, armed: true };
        let result = f();
        unwind.disarm();
        let elapsed = started.elapsed();
        let limit = self.timeout();

        match result {
            Ok(_) if elapsed > limit => {
                self.on_failure(true);
                warn!(breaker = %self.name, ?elapsed, ?limit, "protected call exceeded timeout");
                Err(BreakerError::OperationTimeout { name: self.name.clone(), elapsed, limit })
            }
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(elapsed > limit);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Trip the breaker now. The recovery window starts from this moment.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Open { .. }) {
            warn!(breaker = %self.name, "circuit breaker forced open");
        }
        inner.state = State::Open { since: Instant::now() };
        inner.success_count = 0;
    }

    /// Close the breaker and clear its counters.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Closed) {
            info!(breaker = %self.name, "circuit breaker forced closed");
        }
        inner.state = State::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    /// Return to a fresh closed breaker, clearing totals too.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Self::new(self.name.clone(), self.config.clone()).inner.into_inner();
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.public_state(),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            total_timeouts: inner.total_timeouts,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.timeout_seconds).unwrap_or(Duration::MAX)
    }

    fn recovery(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.recovery_timeout_seconds).unwrap_or(Duration::MAX)
    }

    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.total_calls += 1;
        let admitted = match inner.state {
            State::Closed => true,
            State::Open { since } if since.elapsed() >= self.recovery() => {
                info!(breaker = %self.name, "circuit breaker half-open, probing");
                inner.state = State::HalfOpen { probe_in_flight: true };
                inner.success_count = 0;
                true
            }
            State::Open { .. } | State::HalfOpen { probe_in_flight: true } => false,
            State::HalfOpen { probe_in_flight: false } => {
                inner.state = State::HalfOpen { probe_in_flight: true };
                true
            }
        };
        if admitted {
            Ok(())
        } else {
            inner.total_rejections += 1;
            Err(BreakerError::CircuitOpen { name: self.name.clone() })
        }
    }

    fn on_success(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.total_successes += 1;
        inner.last_success_time = Some(Utc::now());
        match inner.state {
            State::Closed => inner.failure_count = 0,
            State::HalfOpen { .. } => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(breaker = %self.name, "circuit breaker closed after recovery");
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                } else {
                    inner.state = State::HalfOpen { probe_in_flight: false };
                }
            }
            // Forced open while the call ran; leave it open.
            State::Open { .. } => {}
        }
    }

    fn on_failure(&self, timed_out: bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.total_failures += 1;
        if timed_out {
            inner.total_timeouts += 1;
        }
        inner.last_failure_time = Some(Utc::now());
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    inner.state = State::Open { since: Instant::now() };
                }
            }
            State::HalfOpen { .. } => {
                warn!(breaker = %self.name, "probe failed, circuit breaker reopened");
                inner.failure_count += 1;
                inner.success_count = 0;
                inner.state = State::Open { since: Instant::now() };
            }
            State::Open { .. } => {}
        }
    }
}
