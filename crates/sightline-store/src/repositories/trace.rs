//! Trace repository: session rows, history queries and archive bookkeeping.

use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use sightline_core::{TraceId, TraceSession, TraceStatus};

use crate::errors::{Result, StoreError};
use crate::row_helpers::{escape_like, from_epoch, page_bound, parse_enum, parse_json_map, to_epoch, to_u64};

const TABLE: &str = "traces";

const COLUMNS: &str = "trace_id, query, user_id, session_id, start_time, end_time, status,
     total_duration_ms, event_count, modules_involved, success, final_response_length, metadata";

/// Filters for [`TraceRepo::list`]. Unset fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct TraceFilter {
    /// Traces starting at or after this instant.
    pub start_date: Option<DateTime<Utc>>,
    /// Traces starting at or before this instant.
    pub end_date: Option<DateTime<Utc>>,
    /// Exact user id.
    pub user_id: Option<String>,
    /// Exact status.
    pub status: Option<TraceStatus>,
    /// Success flag.
    pub success: Option<bool>,
    /// Substring of the query text.
    pub query_contains: Option<String>,
}

impl TraceFilter {
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::from(" WHERE 1 = 1");
        let mut values = Vec::new();
        if let Some(start) = self.start_date {
            sql.push_str(" AND start_time >= ?");
            values.push(SqlValue::Real(to_epoch(start)));
        }
        if let Some(end) = self.end_date {
            sql.push_str(" AND start_time <= ?");
            values.push(SqlValue::Real(to_epoch(end)));
        }
        if let Some(user) = &self.user_id {
            sql.push_str(" AND user_id = ?");
            values.push(SqlValue::Text(user.clone()));
        }
        if let Some(status) = self.status {
            sql.push_str(" AND status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(success) = self.success {
            sql.push_str(" AND success = ?");
            values.push(SqlValue::Integer(i64::from(success)));
        }
        if let Some(needle) = &self.query_contains {
            sql.push_str(" AND query LIKE ? ESCAPE '\\'");
            values.push(SqlValue::Text(format!("%{}%", escape_like(needle))));
        }
        (sql, values)
    }
}

struct TraceRow {
    trace_id: String,
    query: String,
    user_id: Option<String>,
    session_id: Option<String>,
    start_time: f64,
    end_time: Option<f64>,
    status: String,
    total_duration_ms: Option<f64>,
    event_count: i64,
    modules_involved: String,
    success: Option<bool>,
    final_response_length: Option<i64>,
    metadata: String,
}

impl TraceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            trace_id: row.get(0)?,
            query: row.get(1)?,
            user_id: row.get(2)?,
            session_id: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            status: row.get(6)?,
            total_duration_ms: row.get(7)?,
            event_count: row.get(8)?,
            modules_involved: row.get(9)?,
            success: row.get(10)?,
            final_response_length: row.get(11)?,
            metadata: row.get(12)?,
        })
    }

    fn into_session(self) -> Result<TraceSession> {
        let modules_involved: BTreeSet<String> = serde_json::from_str(&self.modules_involved)
            .map_err(|e| StoreError::CorruptRow {
                table: TABLE,
                column: "modules_involved",
                detail: e.to_string(),
            })?;
        Ok(TraceSession {
            trace_id: TraceId::from_string(self.trace_id),
            query: self.query,
            user_id: self.user_id,
            session_id: self.session_id,
            start_time: from_epoch(self.start_time, TABLE, "start_time")?,
            end_time: self.end_time.map(|t| from_epoch(t, TABLE, "end_time")).transpose()?,
            status: parse_enum(&self.status, TABLE, "status")?,
            total_duration_ms: self.total_duration_ms,
            event_count: to_u64(self.event_count, TABLE, "event_count")?,
            modules_involved,
            success: self.success,
            final_response_length: self
                .final_response_length
                .map(|n| to_u64(n, TABLE, "final_response_length"))
                .transpose()?,
            metadata: parse_json_map(&self.metadata, TABLE, "metadata")?,
        })
    }
}

fn collect(rows: Vec<TraceRow>) -> Result<Vec<TraceSession>> {
    rows.into_iter().map(TraceRow::into_session).collect()
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Trace repository, stateless.
pub struct TraceRepo;

impl TraceRepo {
    /// Insert or update a session row.
    ///
    /// Updates in place rather than `REPLACE`, which would delete the row and
    /// cascade to its events.
    pub fn upsert(conn: &Connection, session: &TraceSession) -> Result<()> {
        let modules = serde_json::to_string(&session.modules_involved)?;
        let metadata = serde_json::to_string(&session.metadata)?;
        let _ = conn.execute(
            "INSERT INTO traces (trace_id, query, user_id, session_id, start_time, end_time, status,
                                 total_duration_ms, event_count, modules_involved, success,
                                 final_response_length, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(trace_id) DO UPDATE SET
                 query = excluded.query,
                 user_id = excluded.user_id,
                 session_id = excluded.session_id,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 status = excluded.status,
                 total_duration_ms = excluded.total_duration_ms,
                 event_count = excluded.event_count,
                 modules_involved = excluded.modules_involved,
                 success = excluded.success,
                 final_response_length = excluded.final_response_length,
                 metadata = excluded.metadata",
            params![
                session.trace_id.as_str(),
                session.query,
                session.user_id,
                session.session_id,
                to_epoch(session.start_time),
                session.end_time.map(to_epoch),
                session.status.as_str(),
                session.total_duration_ms,
                saturating_i64(session.event_count),
                modules,
                session.success,
                session.final_response_length.map(saturating_i64),
                metadata,
                to_epoch(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Get one session.
    pub fn get(conn: &Connection, trace_id: &str) -> Result<Option<TraceSession>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM traces WHERE trace_id = ?1"),
                params![trace_id],
                TraceRow::read,
            )
            .optional()?;
        row.map(TraceRow::into_session).transpose()
    }

    /// Whether a session row exists.
    pub fn exists(conn: &Connection, trace_id: &str) -> Result<bool> {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM traces WHERE trace_id = ?1)",
            params![trace_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Filtered history, newest first.
    pub fn list(
        conn: &Connection,
        filter: &TraceFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TraceSession>> {
        let (clause, mut values) = filter.where_clause();
        let mut sql = format!("SELECT {COLUMNS} FROM traces{clause} ORDER BY start_time DESC");
        let _ = write!(sql, " LIMIT ? OFFSET ?");
        values.push(SqlValue::Integer(page_bound(limit)));
        values.push(SqlValue::Integer(page_bound(offset)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), TraceRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collect(rows)
    }

    /// Sessions whose start time falls within `[start, end]`, oldest first.
    pub fn by_date_range(
        conn: &Connection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TraceSession>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM traces
             WHERE start_time >= ?1 AND start_time <= ?2 ORDER BY start_time ASC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt
            .query_map(
                params![to_epoch(start), to_epoch(end), page_bound(limit), page_bound(offset)],
                TraceRow::read,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collect(rows)
    }

    /// Sessions started before `cutoff` that have not been archived yet.
    pub fn unarchived_before(conn: &Connection, cutoff: f64) -> Result<Vec<TraceSession>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM traces
             WHERE start_time < ?1 AND archived_at IS NULL ORDER BY start_time ASC"
        ))?;
        let rows = stmt
            .query_map(params![cutoff], TraceRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collect(rows)
    }

    /// Stamp `archived_at` on the given sessions.
    pub fn mark_archived(conn: &Connection, trace_ids: &[TraceId], at: DateTime<Utc>) -> Result<usize> {
        let mut stmt = conn.prepare_cached("UPDATE traces SET archived_at = ?1 WHERE trace_id = ?2")?;
        let stamp = to_epoch(at);
        let mut updated = 0;
        for id in trace_ids {
            updated += stmt.execute(params![stamp, id.as_str()])?;
        }
        Ok(updated)
    }

    /// Number of sessions started before `cutoff`.
    pub fn count_before(conn: &Connection, cutoff: f64) -> Result<u64> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM traces WHERE start_time < ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        to_u64(n, TABLE, "count")
    }

    /// Delete sessions started before `cutoff`; their events and metrics go
    /// with them.
    pub fn delete_before(conn: &Connection, cutoff: f64) -> Result<usize> {
        Ok(conn.execute("DELETE FROM traces WHERE start_time < ?1", params![cutoff])?)
    }

    /// Total session rows.
    pub fn count(conn: &Connection) -> Result<u64> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM traces", [], |row| row.get(0))?;
        to_u64(n, TABLE, "count")
    }

    /// Session counts keyed by status.
    pub fn count_by_status(conn: &Connection) -> Result<Vec<(String, u64)>> {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM traces GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(status, n)| Ok((status, to_u64(n, TABLE, "count")?)))
            .collect()
    }

    /// Oldest and newest start times.
    pub fn time_span(conn: &Connection) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let (oldest, newest): (Option<f64>, Option<f64>) = conn.query_row(
            "SELECT MIN(start_time), MAX(start_time) FROM traces",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((
            oldest.map(|t| from_epoch(t, TABLE, "start_time")).transpose()?,
            newest.map(|t| from_epoch(t, TABLE, "start_time")).transpose()?,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
