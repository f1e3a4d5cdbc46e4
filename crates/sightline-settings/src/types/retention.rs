use serde::{Deserialize, Serialize};

/// How long a category is kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete on every cleanup run.
    Immediate,
    /// Days.
    ShortTerm,
    /// Weeks.
    MediumTerm,
    /// Months.
    LongTerm,
    /// Never delete.
    Permanent,
    /// Archive, then delete.
    Archive,
}

impl RetentionPolicy {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
            Self::Permanent => "permanent",
            Self::Archive => "archive",
        }
    }
}

/// Kind of data a retention rule governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Traces and their events.
    TraceEvents,
    /// Per-trace performance samples.
    PerformanceMetrics,
    /// Error events.
    ErrorLogs,
    /// Audit trail, normally permanent.
    SecurityAudit,
    /// Cached analytics results.
    AnalyticsCache,
    /// Files written by exports.
    ExportedData,
}

impl DataCategory {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TraceEvents => "trace_events",
            Self::PerformanceMetrics => "performance_metrics",
            Self::ErrorLogs => "error_logs",
            Self::SecurityAudit => "security_audit",
            Self::AnalyticsCache => "analytics_cache",
            Self::ExportedData => "exported_data",
        }
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention rule for one data category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetentionRule {
    /// Category governed.
    pub category: DataCategory,
    /// Policy class.
    pub policy: RetentionPolicy,
    /// Rows older than this many days are deleted; zero or negative keeps forever.
    pub retention_days: i64,
    /// Rows older than this many days are archived first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_after_days: Option<i64>,
    /// Whether archives are gzip-compressed.
    #[serde(default = "default_compress")]
    pub compress: bool,
}

fn default_compress() -> bool {
    true
}

impl RetentionRule {
    /// Build a rule.
    pub fn new(
        category: DataCategory,
        policy: RetentionPolicy,
        retention_days: i64,
        archive_after_days: Option<i64>,
        compress: bool,
    ) -> Self {
        Self { category, policy, retention_days, archive_after_days, compress }
    }

    /// Whether this rule ever deletes anything.
    pub fn deletes(&self) -> bool {
        match self.policy {
            RetentionPolicy::Permanent => false,
            RetentionPolicy::Immediate => true,
            _ => self.retention_days > 0,
        }
    }
}

/// Retention job settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Whether the scheduler runs jobs automatically.
    pub enable_auto_cleanup: bool,
    /// Interval of the cleanup job.
    pub cleanup_interval_hours: u64,
    /// Interval of the archive job.
    pub archive_interval_hours: u64,
    /// Where archive snapshots are written.
    pub archive_dir: String,
    /// Where pre-cleanup database backups are written.
    pub backup_dir: String,
    /// Directory scanned for the exported-data category.
    pub export_dir: String,
    /// Copy the database before each cleanup.
    pub backup_before_cleanup: bool,
    /// Maximum retained cleanup results.
    pub max_history: usize,
    /// Rules, at most one per category.
    pub rules: Vec<RetentionRule>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        use DataCategory as C;
        use RetentionPolicy as P;
        Self {
            enable_auto_cleanup: true,
            cleanup_interval_hours: 24,
            archive_interval_hours: 168,
            archive_dir: "data/archives".to_string(),
            backup_dir: "data/backups".to_string(),
            export_dir: "data/exports".to_string(),
            backup_before_cleanup: true,
            max_history: 100,
            rules: vec![
                RetentionRule::new(C::TraceEvents, P::MediumTerm, 30, Some(7), true),
                RetentionRule::new(C::PerformanceMetrics, P::LongTerm, 90, Some(30), true),
                RetentionRule::new(C::ErrorLogs, P::LongTerm, 90, None, true),
                RetentionRule::new(C::SecurityAudit, P::Permanent, -1, Some(365), true),
                RetentionRule::new(C::AnalyticsCache, P::ShortTerm, 7, None, false),
                RetentionRule::new(C::ExportedData, P::ShortTerm, 7, None, false),
            ],
        }
    }
}
