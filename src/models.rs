//! Core data types flowing through the sync pipeline.
//!
//! A connector detects changes in an external source and emits one
//! [`ChangeEvent`] per change unit onto the ingest queue. The worker consumes
//! events and normalizes each into zero or more [`UnifiedDocument`]s for the
//! search index.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External knowledge source feeding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Wiki,
    Issues,
    Code,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wiki => "wiki",
            Source::Issues => "issues",
            Source::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "wiki" => Some(Source::Wiki),
            "issues" => Some(Source::Issues),
            "code" => Some(Source::Code),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected change, queued for asynchronous processing.
///
/// The wire form is JSON tagged by `source` (and `item_type`/`event_type`
/// within a source). Parsing lives in [`crate::normalize::parse_event`];
/// unexpanded wiki/issues shapes fall back to [`ChangeEvent::Delta`] so that
/// a malformed producer cannot wedge the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    WikiPage(WikiPageEvent),
    Issue(IssueEvent),
    Comment(CommentEvent),
    CodeFile(CodeFileEvent),
    /// Raw code-host payload relayed without expansion (non-push events,
    /// or push payloads that skipped per-file retrieval).
    CodeRaw(CodeRawEvent),
    /// Unexpanded wiki/issues delta; normalized into a digest-keyed stub.
    Delta { source: Source, raw: String },
}

/// A changed wiki page with its full storage-format body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiPageEvent {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub ancestors: Vec<String>,
    pub updated: String,
    #[serde(default)]
    pub body_storage: String,
}

/// A changed issue with flattened description text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub key: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    pub updated: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A single comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEvent {
    pub key: String,
    pub comment_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    pub updated: String,
    pub url: String,
}

/// One added or modified file from a push, with capped content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFileEvent {
    pub repo: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub content: String,
}

/// Unhandled code-host event relayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRawEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    /// Serialize to the wire form placed on the ingest queue.
    pub fn to_body(&self) -> String {
        let value = match self {
            ChangeEvent::WikiPage(p) => tag(serde_json::to_value(p), "wiki", Some("page"), None),
            ChangeEvent::Issue(i) => tag(serde_json::to_value(i), "issues", Some("issue"), None),
            ChangeEvent::Comment(c) => {
                tag(serde_json::to_value(c), "issues", Some("comment"), None)
            }
            ChangeEvent::CodeFile(f) => tag(serde_json::to_value(f), "code", None, Some("file")),
            ChangeEvent::CodeRaw(r) => tag(serde_json::to_value(r), "code", None, None),
            ChangeEvent::Delta { raw, .. } => return raw.clone(),
        };
        value.to_string()
    }

    pub fn source(&self) -> Source {
        match self {
            ChangeEvent::WikiPage(_) => Source::Wiki,
            ChangeEvent::Issue(_) | ChangeEvent::Comment(_) => Source::Issues,
            ChangeEvent::CodeFile(_) | ChangeEvent::CodeRaw(_) => Source::Code,
            ChangeEvent::Delta { source, .. } => *source,
        }
    }
}

/// Inject the source/op/item_type/event_type tags into a serialized event.
fn tag(
    value: serde_json::Result<serde_json::Value>,
    source: &str,
    item_type: Option<&str>,
    event_type: Option<&str>,
) -> serde_json::Value {
    let mut value = value.unwrap_or_else(|_| serde_json::json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("source".into(), source.into());
        if let Some(it) = item_type {
            map.insert("op".into(), "upsert".into());
            map.insert("item_type".into(), it.into());
        }
        if let Some(et) = event_type {
            map.insert("event_type".into(), et.into());
        }
    }
    value
}

/// The common schema stored in the search index, regardless of source.
///
/// `id` is a deterministic function of source + natural key, so repeated
/// upserts of the same entity overwrite rather than duplicate. ACL fields are
/// captured for future query-time enforcement but unused downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedDocument {
    pub source: String,
    pub id: String,
    pub project: Option<String>,
    pub repo: Option<String>,
    pub path_or_key: Option<String>,
    pub title: String,
    pub tags: Vec<String>,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub acl_allow_users: Vec<String>,
    pub acl_allow_groups: Vec<String>,
    pub acl_allow_projects: Vec<String>,
    pub text: String,
    pub vector: Vec<f32>,
}

impl UnifiedDocument {
    /// A document skeleton with empty ACLs and no vector.
    pub fn new(source: Source, id: String, title: String) -> Self {
        Self {
            source: source.as_str().to_string(),
            id,
            project: None,
            repo: None,
            path_or_key: None,
            title,
            tags: Vec::new(),
            url: None,
            created_at: None,
            updated_at: None,
            acl_allow_users: Vec::new(),
            acl_allow_groups: Vec::new(),
            acl_allow_projects: Vec::new(),
            text: String::new(),
            vector: Vec::new(),
        }
    }
}

/// Result of a completed connector run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub enqueued: u64,
    pub since: String,
    pub latest: String,
}
