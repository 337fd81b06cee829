//! Wiki delta connector.
//!
//! Polls a Confluence-style REST API for pages modified at or after the
//! stored watermark, fetches each page's storage-format body, fans out one
//! change event per page onto the ingest queue, and advances the watermark
//! only after the whole run has succeeded.
//!
//! The delta query filters with `lastmodified >= since`: the boundary item
//! is intentionally re-fetched so same-timestamp siblings are never missed,
//! and the worker's idempotent ids absorb the duplication.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::checkpoint::{bootstrap_since, max_watermark, CheckpointStore};
use crate::config::Config;
use crate::models::{ChangeEvent, Source, SyncSummary, WikiPageEvent};
use crate::queue::IngestQueue;
use crate::secrets::{ApiCredentials, SecretStore};

const CURSOR_KEY: &str = "lastmodified";

pub async fn sync_wiki(config: &Config, pool: &SqlitePool) -> Result<SyncSummary> {
    let store = SecretStore::load(&config.secrets)?;
    let secret_name = config.sources.wiki.secret.as_deref().unwrap_or("wiki");
    let creds = ApiCredentials::resolve(&store, secret_name)
        .with_context(|| format!("resolving credentials for secret '{}'", secret_name))?;

    let checkpoints = CheckpointStore::new(pool.clone());
    let queue = IngestQueue::new(pool.clone(), &config.queue);

    let since = match checkpoints.get(Source::Wiki, CURSOR_KEY).await? {
        Some(value) => value,
        None => bootstrap_since(config.sources.wiki.bootstrap_hours),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sources.wiki.timeout_secs))
        .build()?;

    let page_size = config.sources.wiki.page_size;
    let mut enqueued = 0u64;
    let mut latest = since.clone();
    let mut start = 0usize;

    loop {
        let (page_ids, total) =
            fetch_changed_page_ids(&client, &creds, &since, start, page_size).await?;
        if page_ids.is_empty() {
            break;
        }

        for page_id in &page_ids {
            let event = fetch_page(&client, &creds, page_id, &since).await?;
            latest = max_watermark(&latest, &event.updated);
            queue.send(&ChangeEvent::WikiPage(event).to_body()).await?;
            enqueued += 1;
        }

        start += page_size;
        if start >= total {
            break;
        }
    }

    // Only this write advances the watermark; any earlier failure leaves it
    // untouched so the next run re-fetches the same window.
    checkpoints.put(Source::Wiki, CURSOR_KEY, &latest).await?;

    info!(enqueued, since = %since, latest = %latest, "wiki sync complete");
    println!("sync wiki");
    println!("  enqueued: {}", enqueued);
    println!("  since:    {}", since);
    println!("  latest:   {}", latest);

    Ok(SyncSummary {
        enqueued,
        since,
        latest,
    })
}

/// One page of the CQL delta query, ascending by modification time.
/// Returns the changed page ids plus the reported result total.
async fn fetch_changed_page_ids(
    client: &reqwest::Client,
    creds: &ApiCredentials,
    since: &str,
    start: usize,
    limit: usize,
) -> Result<(Vec<String>, usize)> {
    let url = format!("{}/wiki/rest/api/search", creds.base_url);
    let cql = format!(
        "type=page and lastmodified >= '{}' order by lastmodified",
        since
    );

    let resp = client
        .get(&url)
        .query(&[
            ("cql", cql.as_str()),
            ("start", &start.to_string()),
            ("limit", &limit.to_string()),
        ])
        .basic_auth(&creds.user, Some(&creds.token))
        .send()
        .await
        .context("wiki delta query failed")?;

    let status = resp.status();
    if !status.is_success() {
        bail!("wiki delta query failed (HTTP {})", status);
    }

    let data: serde_json::Value = resp.json().await?;
    let ids = data
        .get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|res| {
                    let content = res.get("content")?;
                    if content.get("type").and_then(|t| t.as_str()) == Some("page") {
                        content
                            .get("id")
                            .and_then(|id| id.as_str())
                            .map(|id| id.to_string())
                    } else {
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    let total = data
        .get("totalSize")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;

    Ok((ids, total))
}

/// Fetch a page's full content and build its change event.
async fn fetch_page(
    client: &reqwest::Client,
    creds: &ApiCredentials,
    page_id: &str,
    fallback_updated: &str,
) -> Result<WikiPageEvent> {
    let url = format!("{}/wiki/rest/api/content/{}", creds.base_url, page_id);

    let resp = client
        .get(&url)
        .query(&[("expand", "body.storage,version,ancestors,space")])
        .basic_auth(&creds.user, Some(&creds.token))
        .send()
        .await
        .with_context(|| format!("fetching wiki page {}", page_id))?;

    let status = resp.status();
    if !status.is_success() {
        bail!("wiki page fetch failed for {} (HTTP {})", page_id, status);
    }

    let page: serde_json::Value = resp.json().await?;
    let updated = page
        .pointer("/version/when")
        .and_then(|w| w.as_str())
        .unwrap_or(fallback_updated)
        .to_string();
    let webui = page
        .pointer("/_links/webui")
        .and_then(|l| l.as_str())
        .unwrap_or_default();

    Ok(WikiPageEvent {
        id: page
            .get("id")
            .and_then(|i| i.as_str())
            .unwrap_or(page_id)
            .to_string(),
        title: page
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        url: format!("{}{}", creds.base_url, webui),
        space: page
            .pointer("/space/key")
            .and_then(|k| k.as_str())
            .map(|k| k.to_string()),
        ancestors: page
            .get("ancestors")
            .and_then(|a| a.as_array())
            .map(|ancestors| {
                ancestors
                    .iter()
                    .filter_map(|a| a.get("title").and_then(|t| t.as_str()))
                    .map(|t| t.to_string())
                    .collect()
            })
            .unwrap_or_default(),
        updated,
        body_storage: page
            .pointer("/body/storage/value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}
