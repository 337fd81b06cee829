//! Durable, at-least-once ingest queue over SQLite.
//!
//! Decouples the connectors (producers) from the normalization worker
//! (consumer). Delivery semantics:
//!
//! - `send` appends a message in the `ready` state.
//! - `receive` returns up to a batch of ready messages whose visibility
//!   window has elapsed, bumping each message's attempt count and hiding it
//!   for `visibility_timeout_secs`. A message that is not acked becomes
//!   visible again, the same at-least-once contract an external broker
//!   would give us.
//! - `ack` deletes a fully processed message.
//! - messages that exhaust `max_attempts` move to the `dead` state and stop
//!   being delivered; they stay in the table for operator inspection.
//!
//! No ordering guarantee is offered to the consumer; the worker compensates
//! with idempotent document ids rather than relying on delivery order.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::QueueConfig;

#[derive(Clone)]
pub struct IngestQueue {
    pool: SqlitePool,
    visibility_timeout_secs: i64,
    max_attempts: i64,
}

/// One delivered message. `attempts` counts this delivery.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    pub attempts: i64,
}

impl IngestQueue {
    pub fn new(pool: SqlitePool, config: &QueueConfig) -> Self {
        Self {
            pool,
            visibility_timeout_secs: config.visibility_timeout_secs,
            max_attempts: config.max_attempts,
        }
    }

    pub async fn send(&self, body: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO ingest_queue (id, body, enqueued_at, available_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deliver up to `batch` visible messages, hiding each for the
    /// visibility window. Messages past the retry budget are dead-lettered
    /// instead of delivered.
    pub async fn receive(&self, batch: i64) -> Result<Vec<QueueMessage>> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE ingest_queue SET state = 'dead' WHERE state = 'ready' AND attempts >= ?")
            .bind(self.max_attempts)
            .execute(&mut *tx)
            .await?;

        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, body, attempts FROM ingest_queue
            WHERE state = 'ready' AND available_at <= ?
            ORDER BY enqueued_at
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, body, attempts) in rows {
            sqlx::query(
                "UPDATE ingest_queue SET available_at = ?, attempts = attempts + 1 WHERE id = ?",
            )
            .bind(now + self.visibility_timeout_secs)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
            messages.push(QueueMessage {
                id,
                body,
                attempts: attempts + 1,
            });
        }

        tx.commit().await?;
        Ok(messages)
    }

    pub async fn ack(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM ingest_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Messages awaiting delivery or redelivery.
    pub async fn depth(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ingest_queue WHERE state = 'ready'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn dead_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ingest_queue WHERE state = 'dead'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
