//! Code host webhook processing.
//!
//! Push payloads arrive through the server's `/hooks/code` route after
//! signature verification. For each commit in a push we fetch the commit
//! detail, keep added and modified files, fetch each file's raw content, and
//! enqueue one event per file. Payloads that are not pushes are wrapped as
//! raw events so nothing is dropped on the floor.

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::{ChangeEvent, CodeFileEvent, CodeRawEvent};
use crate::queue::IngestQueue;
use crate::secrets::CodeCredentials;

/// Enqueue change events for one webhook delivery. Returns the number of
/// messages enqueued.
pub async fn process_delivery(
    client: &reqwest::Client,
    creds: &CodeCredentials,
    content_cap: usize,
    queue: &IngestQueue,
    event_type: &str,
    payload: serde_json::Value,
) -> Result<u64> {
    if event_type == "push" {
        process_push(client, creds, content_cap, queue, &payload).await
    } else {
        let raw = ChangeEvent::CodeRaw(CodeRawEvent {
            event_type: event_type.to_string(),
            payload,
        });
        queue.send(&raw.to_body()).await?;
        Ok(1)
    }
}

async fn process_push(
    client: &reqwest::Client,
    creds: &CodeCredentials,
    content_cap: usize,
    queue: &IngestQueue,
    payload: &serde_json::Value,
) -> Result<u64> {
    let repo = payload
        .pointer("/repository/full_name")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();
    let commits = payload
        .get("commits")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    let mut enqueued = 0u64;
    for commit in &commits {
        let Some(sha) = commit.get("id").and_then(|i| i.as_str()) else {
            continue;
        };
        // A failed detail fetch skips this commit; the rest of the push
        // still lands.
        let detail = match fetch_commit(client, creds, &repo, sha).await {
            Ok(detail) => detail,
            Err(err) => {
                warn!(%sha, error = %err, "commit detail fetch failed, skipping commit");
                continue;
            }
        };

        let files = detail
            .get("files")
            .and_then(|f| f.as_array())
            .cloned()
            .unwrap_or_default();
        for file in &files {
            let status = file.get("status").and_then(|s| s.as_str()).unwrap_or("");
            if status != "added" && status != "modified" {
                continue;
            }
            let Some(path) = file.get("filename").and_then(|f| f.as_str()) else {
                continue;
            };

            let content = match file.get("raw_url").and_then(|u| u.as_str()) {
                Some(raw_url) => fetch_raw(client, creds, raw_url).await,
                None => String::new(),
            };

            let event = CodeFileEvent {
                repo: repo.clone(),
                path: path.to_string(),
                sha: sha.to_string(),
                content: cap_content(&content, content_cap),
            };
            queue.send(&ChangeEvent::CodeFile(event).to_body()).await?;
            enqueued += 1;
        }
    }

    Ok(enqueued)
}

async fn fetch_commit(
    client: &reqwest::Client,
    creds: &CodeCredentials,
    repo: &str,
    sha: &str,
) -> Result<serde_json::Value> {
    let url = format!("{}/repos/{}/commits/{}", creds.api_base, repo, sha);
    let mut req = client.get(&url);
    if !creds.token.is_empty() {
        req = req.bearer_auth(&creds.token);
    }
    let resp = req
        .send()
        .await
        .with_context(|| format!("fetching commit {}", sha))?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("commit fetch failed for {} (HTTP {})", sha, status);
    }
    Ok(resp.json().await?)
}

/// Raw file content, degrading to empty on any failure so one unreadable
/// file cannot sink the whole delivery.
async fn fetch_raw(client: &reqwest::Client, creds: &CodeCredentials, url: &str) -> String {
    let mut req = client.get(url);
    if !creds.token.is_empty() {
        req = req.bearer_auth(&creds.token);
    }
    match req.send().await {
        Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
        Ok(resp) => {
            warn!(%url, status = %resp.status(), "raw content fetch failed");
            String::new()
        }
        Err(err) => {
            warn!(%url, error = %err, "raw content fetch failed");
            String::new()
        }
    }
}

/// Truncate to at most `cap` characters, respecting char boundaries.
fn cap_content(content: &str, cap: usize) -> String {
    match content.char_indices().nth(cap) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}
