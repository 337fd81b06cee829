//! Issue tracker delta connector.
//!
//! Polls a Jira-style REST API for issues updated at or after the stored
//! watermark and enqueues one event per issue plus one per comment on that
//! issue. The watermark folds in comment timestamps too, so it tracks the
//! newest item actually emitted, and is only written once the run succeeds.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::checkpoint::{bootstrap_since, max_watermark, CheckpointStore};
use crate::config::Config;
use crate::models::{ChangeEvent, CommentEvent, IssueEvent, Source, SyncSummary};
use crate::queue::IngestQueue;
use crate::secrets::{ApiCredentials, SecretStore};

const CURSOR_KEY: &str = "updated";

pub async fn sync_issues(config: &Config, pool: &SqlitePool) -> Result<SyncSummary> {
    let store = SecretStore::load(&config.secrets)?;
    let secret_name = config.sources.issues.secret.as_deref().unwrap_or("issues");
    let creds = ApiCredentials::resolve(&store, secret_name)
        .with_context(|| format!("resolving credentials for secret '{}'", secret_name))?;

    let checkpoints = CheckpointStore::new(pool.clone());
    let queue = IngestQueue::new(pool.clone(), &config.queue);

    let since = match checkpoints.get(Source::Issues, CURSOR_KEY).await? {
        Some(value) => value,
        None => bootstrap_since(config.sources.issues.bootstrap_hours),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sources.issues.timeout_secs))
        .build()?;

    let page_size = config.sources.issues.page_size;
    let mut enqueued = 0u64;
    let mut latest = since.clone();
    let mut start_at = 0usize;

    loop {
        let (issues, total) =
            fetch_changed_issues(&client, &creds, &since, start_at, page_size).await?;
        if issues.is_empty() {
            break;
        }

        for issue in &issues {
            let event = issue_event(&creds, issue);
            latest = max_watermark(&latest, &event.updated);
            let key = event.key.clone();
            queue.send(&ChangeEvent::Issue(event).to_body()).await?;
            enqueued += 1;

            for comment in fetch_comments(&client, &creds, &key).await? {
                latest = max_watermark(&latest, &comment.updated);
                queue.send(&ChangeEvent::Comment(comment).to_body()).await?;
                enqueued += 1;
            }
        }

        start_at += page_size;
        if start_at >= total {
            break;
        }
    }

    checkpoints.put(Source::Issues, CURSOR_KEY, &latest).await?;

    info!(enqueued, since = %since, latest = %latest, "issues sync complete");
    println!("sync issues");
    println!("  enqueued: {}", enqueued);
    println!("  since:    {}", since);
    println!("  latest:   {}", latest);

    Ok(SyncSummary {
        enqueued,
        since,
        latest,
    })
}

async fn fetch_changed_issues(
    client: &reqwest::Client,
    creds: &ApiCredentials,
    since: &str,
    start_at: usize,
    max_results: usize,
) -> Result<(Vec<serde_json::Value>, usize)> {
    let url = format!("{}/rest/api/3/search", creds.base_url);
    let jql = format!("updated >= '{}' order by updated", since);

    let resp = client
        .get(&url)
        .query(&[
            ("jql", jql.as_str()),
            ("startAt", &start_at.to_string()),
            ("maxResults", &max_results.to_string()),
            ("fields", "summary,description,updated,project,status,labels"),
        ])
        .basic_auth(&creds.user, Some(&creds.token))
        .send()
        .await
        .context("issue delta query failed")?;

    let status = resp.status();
    if !status.is_success() {
        bail!("issue delta query failed (HTTP {})", status);
    }

    let data: serde_json::Value = resp.json().await?;
    let issues = data
        .get("issues")
        .and_then(|i| i.as_array())
        .cloned()
        .unwrap_or_default();
    let total = data.get("total").and_then(|t| t.as_u64()).unwrap_or(0) as usize;

    Ok((issues, total))
}

fn issue_event(creds: &ApiCredentials, issue: &serde_json::Value) -> IssueEvent {
    let key = issue
        .get("key")
        .and_then(|k| k.as_str())
        .unwrap_or_default()
        .to_string();
    let fields = issue.get("fields").cloned().unwrap_or_default();

    IssueEvent {
        url: format!("{}/browse/{}", creds.base_url, key),
        key,
        summary: fields
            .get("summary")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string(),
        description: flatten_rich_text(fields.get("description")),
        updated: fields
            .get("updated")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string(),
        project: fields
            .pointer("/project/key")
            .and_then(|p| p.as_str())
            .map(|p| p.to_string()),
        status: fields
            .pointer("/status/name")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        labels: fields
            .get("labels")
            .and_then(|l| l.as_array())
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|l| l.as_str())
                    .map(|l| l.to_string())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

async fn fetch_comments(
    client: &reqwest::Client,
    creds: &ApiCredentials,
    key: &str,
) -> Result<Vec<CommentEvent>> {
    let url = format!("{}/rest/api/3/issue/{}/comment", creds.base_url, key);

    let resp = client
        .get(&url)
        .basic_auth(&creds.user, Some(&creds.token))
        .send()
        .await
        .with_context(|| format!("fetching comments for {}", key))?;

    let status = resp.status();
    if !status.is_success() {
        // Fatal: advancing the watermark past unfetched comments would
        // silently drop them from the index forever.
        bail!("comment fetch failed for {} (HTTP {})", key, status);
    }

    let data: serde_json::Value = resp.json().await?;
    let comments = data
        .get("comments")
        .and_then(|c| c.as_array())
        .map(|comments| {
            comments
                .iter()
                .map(|c| CommentEvent {
                    key: key.to_string(),
                    comment_id: c
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    text: flatten_rich_text(c.get("body")),
                    author: c
                        .pointer("/author/displayName")
                        .and_then(|a| a.as_str())
                        .map(|a| a.to_string()),
                    updated: c
                        .get("updated")
                        .and_then(|u| u.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url: format!("{}/browse/{}", creds.base_url, key),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(comments)
}

/// Flatten a rich-text document (nested content nodes) to plain text by
/// collecting every `text` leaf in document order. Plain strings pass
/// through untouched.
pub fn flatten_rich_text(value: Option<&serde_json::Value>) -> String {
    let mut out = Vec::new();
    if let Some(value) = value {
        collect_text(value, &mut out);
    }
    out.join(" ")
}

fn collect_text(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
                out.push(text.to_string());
            }
            if let Some(content) = map.get("content").and_then(|c| c.as_array()) {
                for child in content {
                    collect_text(child, out);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}
