//! Queue worker.
//!
//! Pulls batches off the ingest queue, normalizes each event into unified
//! documents, embeds their text, and upserts into the search index. A
//! message is acknowledged only after every document it produced has been
//! indexed; a failure leaves it for redelivery, and the queue dead-letters
//! it after the attempt budget runs out.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{clip_for_embedding, embed_text};
use crate::index::SearchIndex;
use crate::normalize::{normalize, parse_event};
use crate::queue::{IngestQueue, QueueMessage};

pub struct Worker {
    queue: IngestQueue,
    index: Arc<dyn SearchIndex>,
    embedding: EmbeddingConfig,
    batch_size: i64,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(config: &Config, pool: SqlitePool, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            queue: IngestQueue::new(pool, &config.queue),
            index,
            embedding: config.embedding.clone(),
            batch_size: config.queue.batch_size as i64,
            poll_interval: Duration::from_secs(config.queue.poll_interval_secs),
        }
    }

    /// Drain one batch. Returns how many messages were processed
    /// successfully.
    pub async fn run_once(&self) -> Result<u64> {
        let messages = self.queue.receive(self.batch_size).await?;
        let mut processed = 0u64;
        for message in messages {
            match self.process_message(&message).await {
                Ok(count) => {
                    self.queue.ack(&message.id).await?;
                    debug!(id = %message.id, documents = count, "message processed");
                    processed += 1;
                }
                Err(err) => {
                    // Leave the message in flight; it becomes visible again
                    // when the visibility window lapses.
                    error!(id = %message.id, attempts = message.attempts, error = %err,
                        "message processing failed");
                }
            }
        }
        Ok(processed)
    }

    /// Poll forever.
    pub async fn run_loop(&self) -> Result<()> {
        info!(batch = self.batch_size, "worker started");
        loop {
            let processed = self.run_once().await?;
            if processed == 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn process_message(&self, message: &QueueMessage) -> Result<usize> {
        let event = parse_event(&message.body)?;
        let mut documents = normalize(&event);

        for doc in &mut documents {
            let clipped = clip_for_embedding(&doc.text);
            doc.vector = match embed_text(&self.embedding, clipped).await {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(id = %doc.id, error = %err, "embedding failed, indexing without vector");
                    Vec::new()
                }
            };
            self.index.upsert(doc).await?;
        }

        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::index::MemoryIndex;
    use crate::models::{ChangeEvent, WikiPageEvent};
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn test_setup() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect(&dir.path().join("test.db")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    fn test_config(dir: &TempDir) -> Config {
        Config {
            db: DbConfig {
                path: dir.path().join("test.db"),
            },
            queue: Default::default(),
            secrets: Default::default(),
            sources: Default::default(),
            embedding: Default::default(),
            index: Default::default(),
            server: Default::default(),
        }
    }

    fn page_body(id: &str, title: &str, body: &str) -> String {
        ChangeEvent::WikiPage(WikiPageEvent {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://wiki.example.com/pages/{}", id),
            space: Some("ENG".to_string()),
            ancestors: vec![],
            updated: "2026-01-01T00:00:00Z".to_string(),
            body_storage: body.to_string(),
        })
        .to_body()
    }

    #[tokio::test]
    async fn run_once_indexes_and_acks() {
        let (_dir, pool) = test_setup().await;
        let config = test_config(&_dir);
        let queue = IngestQueue::new(pool.clone(), &config.queue);
        queue.send(&page_body("1", "Runbook", "<p>restart the service</p>"))
            .await
            .unwrap();

        let index = Arc::new(MemoryIndex::new());
        let worker = Worker::new(&config, pool, index.clone());
        assert_eq!(worker.run_once().await.unwrap(), 1);

        assert_eq!(index.count().await, 1);
        let doc = index.get("wiki:1").await.unwrap();
        assert_eq!(doc.title, "Runbook");
        assert!(doc.vector.is_empty());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reprocessing_overwrites_not_duplicates() {
        let (_dir, pool) = test_setup().await;
        let config = test_config(&_dir);
        let queue = IngestQueue::new(pool.clone(), &config.queue);
        queue.send(&page_body("7", "Old title", "old")).await.unwrap();
        queue.send(&page_body("7", "New title", "new")).await.unwrap();

        let index = Arc::new(MemoryIndex::new());
        let worker = Worker::new(&config, pool, index.clone());
        worker.run_once().await.unwrap();

        assert_eq!(index.count().await, 1);
        assert_eq!(index.get("wiki:7").await.unwrap().title, "New title");
    }

    #[tokio::test]
    async fn bad_message_left_for_redelivery_others_proceed() {
        let (_dir, pool) = test_setup().await;
        let config = test_config(&_dir);
        let queue = IngestQueue::new(pool.clone(), &config.queue);
        queue.send("{\"source\":\"martian\"}").await.unwrap();
        queue.send(&page_body("2", "Good", "fine")).await.unwrap();

        let index = Arc::new(MemoryIndex::new());
        let worker = Worker::new(&config, pool, index.clone());
        let processed = worker.run_once().await.unwrap();

        assert_eq!(processed, 1);
        assert_eq!(index.count().await, 1);
        // The bad message stays queued, hidden until its window lapses.
        assert_eq!(queue.depth().await.unwrap(), 1);
    }
}
