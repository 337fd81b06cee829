//! Change-event parsing and normalization into unified documents.
//!
//! Incoming queue messages are loosely-typed JSON tagged by `source`. This
//! module turns them into the [`ChangeEvent`] tagged union and maps each
//! variant to zero or more [`UnifiedDocument`]s with deterministic ids, so
//! that reprocessing a redelivered message converges on the same index state
//! instead of duplicating entries.
//!
//! Unrecognized wiki/issues shapes route to a digest-keyed "delta marker"
//! stub rather than failing the message; unknown source tags are rejected.

use anyhow::{bail, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{
    ChangeEvent, CodeFileEvent, CodeRawEvent, CommentEvent, IssueEvent, Source, UnifiedDocument,
    WikiPageEvent,
};

/// Parse a queue message body into a [`ChangeEvent`].
///
/// # Errors
///
/// Returns an error for bodies that are not JSON objects or whose `source`
/// tag is missing or unknown. Those messages cannot be attributed to any
/// normalization rule and are left to the queue's retry/dead-letter policy.
pub fn parse_event(body: &str) -> Result<ChangeEvent> {
    let value: Value = serde_json::from_str(body)?;
    let source_tag = value
        .get("source")
        .and_then(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("message has no source tag"))?;

    let source = match Source::parse(source_tag) {
        Some(s) => s,
        None => bail!("unrecognized source tag: {}", source_tag),
    };

    match source {
        Source::Wiki => {
            if value.get("item_type").and_then(|t| t.as_str()) == Some("page") {
                if let Ok(page) = serde_json::from_value::<WikiPageEvent>(value.clone()) {
                    return Ok(ChangeEvent::WikiPage(page));
                }
            }
            Ok(ChangeEvent::Delta {
                source,
                raw: body.to_string(),
            })
        }
        Source::Issues => match value.get("item_type").and_then(|t| t.as_str()) {
            Some("issue") => match serde_json::from_value::<IssueEvent>(value.clone()) {
                Ok(issue) => Ok(ChangeEvent::Issue(issue)),
                Err(_) => Ok(delta(source, body)),
            },
            Some("comment") => match serde_json::from_value::<CommentEvent>(value.clone()) {
                Ok(comment) => Ok(ChangeEvent::Comment(comment)),
                Err(_) => Ok(delta(source, body)),
            },
            _ => Ok(delta(source, body)),
        },
        Source::Code => match value.get("event_type").and_then(|t| t.as_str()) {
            Some("file") => match serde_json::from_value::<CodeFileEvent>(value.clone()) {
                Ok(file) => Ok(ChangeEvent::CodeFile(file)),
                Err(_) => Ok(ChangeEvent::CodeRaw(CodeRawEvent {
                    event_type: "file".to_string(),
                    payload: value,
                })),
            },
            Some(event_type) => Ok(ChangeEvent::CodeRaw(CodeRawEvent {
                event_type: event_type.to_string(),
                payload: value.get("payload").cloned().unwrap_or(Value::Null),
            })),
            None => bail!("code message has no event_type"),
        },
    }
}

fn delta(source: Source, body: &str) -> ChangeEvent {
    ChangeEvent::Delta {
        source,
        raw: body.to_string(),
    }
}

/// Map a change event to its unified documents.
///
/// Documents come back without vectors; the worker fills those in.
pub fn normalize(event: &ChangeEvent) -> Vec<UnifiedDocument> {
    match event {
        ChangeEvent::WikiPage(page) => vec![normalize_wiki_page(page)],
        ChangeEvent::Issue(issue) => vec![normalize_issue(issue)],
        ChangeEvent::Comment(comment) => vec![normalize_comment(comment)],
        ChangeEvent::CodeFile(file) => vec![normalize_code_file(file)],
        ChangeEvent::CodeRaw(raw) => normalize_code_raw(raw),
        ChangeEvent::Delta { source, raw } => vec![normalize_delta(*source, raw)],
    }
}

fn normalize_wiki_page(page: &WikiPageEvent) -> UnifiedDocument {
    let mut doc = UnifiedDocument::new(
        Source::Wiki,
        format!("wiki:{}", page.id),
        page.title.clone(),
    );
    doc.project = page.space.clone();
    doc.path_or_key = Some(page.id.clone());
    doc.tags = vec!["page".to_string()];
    doc.url = Some(page.url.clone());
    doc.updated_at = Some(page.updated.clone());
    doc.text = if page.body_storage.is_empty() {
        page.title.clone()
    } else {
        format!("{}\n\n{}", page.title, page.body_storage)
    };
    doc
}

fn normalize_issue(issue: &IssueEvent) -> UnifiedDocument {
    let mut doc = UnifiedDocument::new(
        Source::Issues,
        format!("issues:{}", issue.key),
        issue.summary.clone(),
    );
    doc.project = issue.project.clone();
    doc.path_or_key = Some(issue.key.clone());
    doc.tags = std::iter::once("issue".to_string())
        .chain(issue.labels.iter().cloned())
        .collect();
    doc.url = Some(issue.url.clone());
    doc.updated_at = Some(issue.updated.clone());
    doc.text = if issue.description.is_empty() {
        issue.summary.clone()
    } else {
        format!("{}\n\n{}", issue.summary, issue.description)
    };
    doc
}

fn normalize_comment(comment: &CommentEvent) -> UnifiedDocument {
    let mut doc = UnifiedDocument::new(
        Source::Issues,
        format!("issues:{}:comment:{}", comment.key, comment.comment_id),
        format!("{} comment", comment.key),
    );
    doc.path_or_key = Some(comment.key.clone());
    doc.tags = vec!["comment".to_string()];
    doc.url = Some(comment.url.clone());
    doc.updated_at = Some(comment.updated.clone());
    doc.text = comment.text.clone();
    doc
}

fn normalize_code_file(file: &CodeFileEvent) -> UnifiedDocument {
    let mut doc = UnifiedDocument::new(
        Source::Code,
        format!("code:{}:{}", file.sha, file.path),
        file.path.clone(),
    );
    doc.project = repo_owner(&file.repo);
    doc.repo = Some(file.repo.clone());
    doc.path_or_key = Some(file.path.clone());
    doc.tags = vec!["file".to_string()];
    doc.text = file.content.clone();
    doc
}

/// Raw push payloads yield one document per commit; any other raw code
/// event yields nothing.
fn normalize_code_raw(raw: &CodeRawEvent) -> Vec<UnifiedDocument> {
    if raw.event_type != "push" {
        return Vec::new();
    }

    let repo = raw
        .payload
        .pointer("/repository/full_name")
        .and_then(|v| v.as_str());
    let url = raw
        .payload
        .get("compare")
        .and_then(|v| v.as_str())
        .or_else(|| {
            raw.payload
                .pointer("/repository/html_url")
                .and_then(|v| v.as_str())
        });

    let commits = match raw.payload.get("commits").and_then(|c| c.as_array()) {
        Some(commits) => commits,
        None => return Vec::new(),
    };

    commits
        .iter()
        .filter_map(|commit| {
            let sha = commit.get("id").and_then(|v| v.as_str())?;
            let message = commit
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("commit");
            let added: Vec<&str> = commit
                .get("added")
                .and_then(|a| a.as_array())
                .map(|a| a.iter().filter_map(|p| p.as_str()).collect())
                .unwrap_or_default();
            let timestamp = commit
                .get("timestamp")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            let mut doc = UnifiedDocument::new(
                Source::Code,
                format!("code:{}", sha),
                message.to_string(),
            );
            doc.project = repo.and_then(repo_owner_str);
            doc.repo = repo.map(|r| r.to_string());
            doc.tags = vec!["commit".to_string()];
            doc.url = url.map(|u| u.to_string());
            doc.created_at = timestamp.clone();
            doc.updated_at = timestamp;
            doc.text = format!("{}\n{}", message, added.join("\n"));
            Some(doc)
        })
        .collect()
}

/// Stub "delta marker" for an unexpanded wiki/issues message.
///
/// The id doubles as the uniqueness key, so the digest is a truncated
/// cryptographic hash rather than a general-purpose one.
fn normalize_delta(source: Source, raw: &str) -> UnifiedDocument {
    let mut doc = UnifiedDocument::new(
        source,
        format!("{}:delta:{}", source, delta_digest(raw)),
        format!("{} delta", source),
    );
    doc.tags = vec!["delta".to_string()];
    doc.text = raw.to_string();
    doc
}

/// First 16 hex chars of SHA-256 over the serialized message.
pub fn delta_digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn repo_owner(repo: &str) -> Option<String> {
    repo_owner_str(repo)
}

fn repo_owner_str(repo: &str) -> Option<String> {
    repo.split('/').next().map(|o| o.to_string())
}
