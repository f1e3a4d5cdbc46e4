//! Process memory and CPU snapshots attached to event metadata.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// One resource reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Resident memory of this process in MiB.
    pub memory_usage_mb: f64,
    /// CPU use of this process in percent of one core.
    pub cpu_usage_percent: f64,
    /// Fraction of system memory in use.
    pub memory_fraction: f64,
}

struct ProbeState {
    system: System,
    pid: Option<Pid>,
    last: Option<(Instant, ResourceSnapshot)>,
}

/// Samples resource use, reusing a reading for `interval`.
///
/// Refreshing process stats costs a few syscalls, so events logged in quick
/// succession share one snapshot.
pub struct ResourceProbe {
    interval: Duration,
    state: Mutex<ProbeState>,
}

impl std::fmt::Debug for ResourceProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProbe").field("interval", &self.interval).finish_non_exhaustive()
    }
}

impl ResourceProbe {
    /// A probe caching readings for `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ProbeState {
                system: System::new(),
                pid: sysinfo::get_current_pid().ok(),
                last: None,
            }),
        }
    }

    /// Current reading, refreshed at most once per interval.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut state = self.state.lock();
        if let Some((at, snapshot)) = state.last {
            if at.elapsed() < self.interval {
                return snapshot;
            }
        }
        let snapshot = refresh(&mut state);
        state.last = Some((Instant::now(), snapshot));
        snapshot
    }
}

#[allow(clippy::cast_precision_loss)]
fn refresh(state: &mut ProbeState) -> ResourceSnapshot {
    state.system.refresh_memory();
    let total = state.system.total_memory();
    let memory_fraction =
        if total == 0 { 0.0 } else { state.system.used_memory() as f64 / total as f64 };

    let (memory_usage_mb, cpu_usage_percent) = match state.pid {
        Some(pid) => {
            let _ = state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
            state.system.process(pid).map_or((0.0, 0.0), |process| {
                (process.memory() as f64 / (1024.0 * 1024.0), f64::from(process.cpu_usage()))
            })
        }
        None => (0.0, 0.0),
    };

    ResourceSnapshot { memory_usage_mb, cpu_usage_percent, memory_fraction }
}
