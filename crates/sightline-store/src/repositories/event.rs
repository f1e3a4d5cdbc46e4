//! Event repository.

use chrono::Utc;
use rusqlite::{Connection, Row, params};
use sightline_core::{EventId, TraceEvent, TraceId};

use crate::errors::Result;
use crate::row_helpers::{from_epoch, page_bound, parse_enum, parse_json_map, to_epoch, to_u64};

const TABLE: &str = "events";

struct EventRow {
    event_id: String,
    trace_id: String,
    timestamp: f64,
    source_module: String,
    event_type: String,
    severity: String,
    message: String,
    duration_ms: Option<f64>,
    parent_event_id: Option<String>,
    payload: String,
    metadata: String,
    sequence_number: i64,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            trace_id: row.get(1)?,
            timestamp: row.get(2)?,
            source_module: row.get(3)?,
            event_type: row.get(4)?,
            severity: row.get(5)?,
            message: row.get(6)?,
            duration_ms: row.get(7)?,
            parent_event_id: row.get(8)?,
            payload: row.get(9)?,
            metadata: row.get(10)?,
            sequence_number: row.get(11)?,
        })
    }

    fn into_event(self) -> Result<TraceEvent> {
        Ok(TraceEvent {
            event_id: EventId::from_string(self.event_id),
            trace_id: TraceId::from_string(self.trace_id),
            timestamp: from_epoch(self.timestamp, TABLE, "timestamp")?,
            source_module: self.source_module,
            event_type: parse_enum(&self.event_type, TABLE, "event_type")?,
            severity: parse_enum(&self.severity, TABLE, "severity")?,
            message: self.message,
            duration_ms: self.duration_ms,
            parent_event_id: self.parent_event_id.map(EventId::from_string),
            payload: parse_json_map(&self.payload, TABLE, "payload")?,
            metadata: parse_json_map(&self.metadata, TABLE, "metadata")?,
            sequence_number: to_u64(self.sequence_number, TABLE, "sequence_number")?,
        })
    }
}

/// Event repository, stateless.
pub struct EventRepo;

impl EventRepo {
    /// Insert or replace events. The caller owns the surrounding transaction.
    pub fn insert_all(conn: &Connection, events: &[TraceEvent]) -> Result<usize> {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO events (event_id, trace_id, timestamp, source_module, event_type,
                                            severity, message, duration_ms, parent_event_id, payload,
                                            metadata, sequence_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        let created_at = to_epoch(Utc::now());
        let mut written = 0;
        for event in events {
            let payload = serde_json::to_string(&event.payload)?;
            let metadata = serde_json::to_string(&event.metadata)?;
            written += stmt.execute(params![
                event.event_id.as_str(),
                event.trace_id.as_str(),
                to_epoch(event.timestamp),
                event.source_module,
                event.event_type.as_str(),
                event.severity.as_str(),
                event.message,
                event.duration_ms,
                event.parent_event_id.as_ref().map(EventId::as_str),
                payload,
                metadata,
                i64::try_from(event.sequence_number).unwrap_or(i64::MAX),
                created_at,
            ])?;
        }
        Ok(written)
    }

    /// Every event of one trace in sequence order.
    pub fn for_trace(conn: &Connection, trace_id: &str) -> Result<Vec<TraceEvent>> {
        Self::page_for_trace(conn, trace_id, usize::MAX, 0)
    }

    /// One page of a trace's events in sequence order.
    pub fn page_for_trace(
        conn: &Connection,
        trace_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TraceEvent>> {
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, trace_id, timestamp, source_module, event_type, severity, message,
                    duration_ms, parent_event_id, payload, metadata, sequence_number
             FROM events WHERE trace_id = ?1 ORDER BY sequence_number ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![trace_id, page_bound(limit), page_bound(offset)], EventRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Events belonging to traces started before `cutoff`.
    pub fn count_for_traces_before(conn: &Connection, cutoff: f64) -> Result<u64> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events
             WHERE trace_id IN (SELECT trace_id FROM traces WHERE start_time < ?1)",
            params![cutoff],
            |row| row.get(0),
        )?;
        to_u64(n, TABLE, "count")
    }

    /// Total event rows.
    pub fn count(conn: &Connection) -> Result<u64> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        to_u64(n, TABLE, "count")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
