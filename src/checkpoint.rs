//! Checkpoint store: `(source, cursor_key) → watermark`.
//!
//! The watermark is an ISO-8601 timestamp string marking the boundary up to
//! which a source has been fully synchronized. Writes are last-writer-wins
//! overwrites; a connector performs exactly one write, after its whole run
//! has succeeded, so a mid-run failure leaves the previous watermark in
//! place and the next run re-fetches the overlapping window.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::Source;

#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, source: Source, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT cursor_value FROM checkpoints WHERE source = ? AND cursor_key = ?",
        )
        .bind(source.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn put(&self, source: Source, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor_key, cursor_value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source, cursor_key) DO UPDATE SET
                cursor_value = excluded.cursor_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source.as_str())
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All stored watermarks, for status reporting.
    pub async fn all(&self) -> Result<Vec<(String, String, String)>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT source, cursor_key, cursor_value FROM checkpoints ORDER BY source, cursor_key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// The later of two ISO-8601 timestamps.
///
/// Falls back to lexicographic comparison when either side fails to parse;
/// same-format ISO strings order correctly either way.
pub fn max_watermark(a: &str, b: &str) -> String {
    let pa = DateTime::parse_from_rfc3339(a);
    let pb = DateTime::parse_from_rfc3339(b);
    let b_is_later = match (pa, pb) {
        (Ok(ta), Ok(tb)) => tb > ta,
        _ => b > a,
    };
    if b_is_later { b.to_string() } else { a.to_string() }
}

/// Bootstrap watermark: `now − hours`, RFC 3339.
pub fn bootstrap_since(hours: i64) -> String {
    (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339()
}
