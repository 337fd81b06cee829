use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Per-source watermark rows; overwritten, never appended.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT NOT NULL,
            cursor_key TEXT NOT NULL,
            cursor_value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (source, cursor_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Durable at-least-once ingest queue.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_queue (
            id TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            available_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'ready'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_state_available ON ingest_queue(state, available_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
