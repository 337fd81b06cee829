//! Operational snapshot: stored watermarks and queue depth.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::queue::IngestQueue;

pub async fn print_status(config: &Config, pool: &SqlitePool) -> Result<()> {
    let checkpoints = CheckpointStore::new(pool.clone());
    let queue = IngestQueue::new(pool.clone(), &config.queue);

    println!("watermarks:");
    let all = checkpoints.all().await?;
    if all.is_empty() {
        println!("  (none)");
    }
    for (source, key, value) in &all {
        println!("  {}/{}: {}", source, key, value);
    }

    println!("queue:");
    println!("  ready/inflight: {}", queue.depth().await?);
    println!("  dead-lettered:  {}", queue.dead_count().await?);

    Ok(())
}
