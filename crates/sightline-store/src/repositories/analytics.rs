//! Cached analytics results keyed by name.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::errors::Result;
use crate::row_helpers::to_epoch;

/// Analytics cache repository, stateless.
pub struct AnalyticsCacheRepo;

impl AnalyticsCacheRepo {
    /// Store a value, replacing any previous entry under `key`.
    pub fn put(conn: &Connection, key: &str, payload: &Value, ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now();
        let _ = conn.execute(
            "INSERT OR REPLACE INTO analytics_cache (cache_key, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                serde_json::to_string(payload)?,
                to_epoch(now),
                ttl.map(|ttl| to_epoch(now + ttl)),
            ],
        )?;
        Ok(())
    }

    /// Fetch a value that has not expired as of `now`.
    pub fn get(conn: &Connection, key: &str, now: DateTime<Utc>) -> Result<Option<Value>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload FROM analytics_cache
                 WHERE cache_key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, to_epoch(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    /// Entries created before `cutoff` plus anything already expired.
    pub fn count_stale(conn: &Connection, cutoff: f64, now: f64) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM analytics_cache WHERE created_at < ?1 OR expires_at <= ?2",
            params![cutoff, now],
            |row| row.get(0),
        )?)
    }

    /// Delete entries created before `cutoff` plus anything already expired.
    pub fn delete_stale(conn: &Connection, cutoff: f64, now: f64) -> Result<usize> {
        Ok(conn.execute(
            "DELETE FROM analytics_cache WHERE created_at < ?1 OR expires_at <= ?2",
            params![cutoff, now],
        )?)
    }
}
