//! CLI query path: search the configured index and print cited hits.

use anyhow::Result;

use crate::config::Config;
use crate::index::{create_index, SearchHit};

pub async fn run_query(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let index = create_index(&config.index)?;
    let top_k = top_k.unwrap_or(config.index.top_k);
    let hits = index.search(query, top_k).await?;
    print_hits(query, &hits);
    Ok(())
}

fn print_hits(query: &str, hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results for '{}'", query);
        return;
    }
    println!("Results for '{}':", query);
    for (rank, hit) in hits.iter().enumerate() {
        let url = hit.url.as_deref().unwrap_or("-");
        println!(
            "  {}. [{}] {} ({:.3})\n     {}",
            rank + 1,
            hit.source,
            hit.title,
            hit.score,
            url
        );
    }
}
