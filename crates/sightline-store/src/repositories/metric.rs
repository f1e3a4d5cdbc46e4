//! Performance metric samples attached to traces.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use sightline_core::{JsonMap, TraceId};

use crate::errors::Result;
use crate::row_helpers::{from_epoch, parse_json_map, to_epoch, to_u64};

const TABLE: &str = "performance_metrics";

/// A sample to persist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name, e.g. `response_time`.
    pub name: String,
    /// Sample value.
    pub value: f64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Free-form context.
    #[serde(default)]
    pub metadata: JsonMap,
}

impl MetricSample {
    /// Sample taken now with empty metadata.
    pub fn now(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value, timestamp: Utc::now(), metadata: JsonMap::new() }
    }
}

/// A sample read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMetric {
    /// Row id.
    pub metric_id: i64,
    /// Owning trace, if any.
    pub trace_id: Option<TraceId>,
    /// The sample.
    #[serde(flatten)]
    pub sample: MetricSample,
}

struct MetricRow {
    metric_id: i64,
    trace_id: Option<String>,
    name: String,
    value: f64,
    timestamp: f64,
    metadata: String,
}

impl MetricRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            metric_id: row.get(0)?,
            trace_id: row.get(1)?,
            name: row.get(2)?,
            value: row.get(3)?,
            timestamp: row.get(4)?,
            metadata: row.get(5)?,
        })
    }

    fn into_metric(self) -> Result<StoredMetric> {
        Ok(StoredMetric {
            metric_id: self.metric_id,
            trace_id: self.trace_id.map(TraceId::from_string),
            sample: MetricSample {
                name: self.name,
                value: self.value,
                timestamp: from_epoch(self.timestamp, TABLE, "timestamp")?,
                metadata: parse_json_map(&self.metadata, TABLE, "metadata")?,
            },
        })
    }
}

fn collect(rows: Vec<MetricRow>) -> Result<Vec<StoredMetric>> {
    rows.into_iter().map(MetricRow::into_metric).collect()
}

const SELECT: &str =
    "SELECT metric_id, trace_id, metric_name, metric_value, timestamp, metadata FROM performance_metrics";

/// Metric repository, stateless.
pub struct MetricRepo;

impl MetricRepo {
    /// Append samples.
    pub fn insert_all(conn: &Connection, trace_id: Option<&TraceId>, samples: &[MetricSample]) -> Result<usize> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO performance_metrics (trace_id, metric_name, metric_value, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut written = 0;
        for sample in samples {
            written += stmt.execute(params![
                trace_id.map(TraceId::as_str),
                sample.name,
                sample.value,
                to_epoch(sample.timestamp),
                serde_json::to_string(&sample.metadata)?,
            ])?;
        }
        Ok(written)
    }

    /// Samples attached to one trace, oldest first.
    pub fn for_trace(conn: &Connection, trace_id: &str) -> Result<Vec<StoredMetric>> {
        let mut stmt = conn.prepare(&format!("{SELECT} WHERE trace_id = ?1 ORDER BY metric_id ASC"))?;
        let rows = stmt
            .query_map(params![trace_id], MetricRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collect(rows)
    }

    /// Samples taken before `cutoff`, oldest first.
    pub fn before(conn: &Connection, cutoff: f64) -> Result<Vec<StoredMetric>> {
        let mut stmt = conn.prepare(&format!("{SELECT} WHERE timestamp < ?1 ORDER BY timestamp ASC"))?;
        let rows = stmt
            .query_map(params![cutoff], MetricRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collect(rows)
    }

    /// Delete samples taken before `cutoff`.
    pub fn delete_before(conn: &Connection, cutoff: f64) -> Result<usize> {
        Ok(conn.execute("DELETE FROM performance_metrics WHERE timestamp < ?1", params![cutoff])?)
    }

    /// Total sample rows.
    pub fn count(conn: &Connection) -> Result<u64> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM performance_metrics", [], |row| row.get(0))?;
        to_u64(n, TABLE, "count")
    }
}
