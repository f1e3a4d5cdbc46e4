use serde::{Deserialize, Serialize};

/// Longest allowed `default_timeout_minutes` (one day).
pub const MAX_PAUSE_TIMEOUT_MINUTES: u64 = 1440;

/// Breakpoint subsystem settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointSettings {
    /// Master switch; when off no event ever matches.
    pub enable_breakpoints: bool,
    /// How long a paused trace waits before it is resumed automatically.
    pub default_timeout_minutes: u64,
    /// Maximum number of armed (active or triggered) breakpoints.
    pub max_breakpoints: usize,
    /// Maximum number of simultaneously paused traces.
    pub max_paused_traces: usize,
    /// Evaluations slower than this are logged and treated as no match.
    pub condition_timeout_seconds: f64,
    /// Whether the sweeper expires breakpoints past their TTL or hit budget.
    pub auto_cleanup_expired: bool,
    /// Maximum retained breakpoint hits.
    pub hit_history_limit: usize,
    /// Sweeper interval.
    pub sweep_interval_seconds: u64,
    /// JSON file the breakpoint set is persisted to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

impl Default for BreakpointSettings {
    fn default() -> Self {
        Self {
            enable_breakpoints: true,
            default_timeout_minutes: 30,
            max_breakpoints: 50,
            max_paused_traces: 10,
            condition_timeout_seconds: 5.0,
            auto_cleanup_expired: true,
            hit_history_limit: 1000,
            sweep_interval_seconds: 60,
            storage_path: Some("config/breakpoints.json".to_string()),
        }
    }
}
