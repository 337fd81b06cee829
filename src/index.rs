//! Search index collaborator.
//!
//! The [`SearchIndex`] trait is the seam between the pipeline and whatever
//! actually stores documents. Two implementations:
//!
//! - [`HttpSearchIndex`]: an OpenSearch-compatible HTTP collaborator,
//!   `PUT /<index>/_doc/<id>` for upserts and a `multi_match` query over
//!   `title^2, text` for lexical search. A non-2xx upsert response is
//!   logged, not raised, per the worker's isolation contract.
//! - [`MemoryIndex`]: a non-durable in-process index with the same
//!   title-weighted lexical scoring, used for local runs and tests.
//!
//! Vector fields are stored verbatim on every document but not searched;
//! the query path is lexical-only.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::error;

use crate::config::IndexConfig;
use crate::models::UnifiedDocument;

/// One ranked search hit; carries exactly the citation fields the query
/// path promises to keep queryable.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub source: String,
    pub title: String,
    pub url: Option<String>,
    pub score: f64,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Write a document keyed by its deterministic id; repeating the write
    /// with the same id overwrites instead of duplicating.
    async fn upsert(&self, doc: &UnifiedDocument) -> Result<()>;

    /// Lexical multi-field search, `title` weighted above `text`.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

/// Instantiate the index backend named in the configuration.
pub fn create_index(config: &IndexConfig) -> Result<Arc<dyn SearchIndex>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        "http" => {
            let endpoint = config
                .endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("index.endpoint required for http backend"))?;
            Ok(Arc::new(HttpSearchIndex::new(
                endpoint,
                &config.name,
                config.timeout_secs,
            )?))
        }
        other => bail!("Unknown index backend: {}", other),
    }
}

// ============ HTTP backend ============

pub struct HttpSearchIndex {
    client: reqwest::Client,
    endpoint: String,
    index: String,
}

impl HttpSearchIndex {
    pub fn new(endpoint: &str, index: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, doc: &UnifiedDocument) -> Result<()> {
        let url = format!("{}/{}/_doc/{}", self.endpoint, self.index, doc.id);
        let resp = self.client.put(&url).json(doc).send().await?;

        let status = resp.status();
        if !status.is_success() {
            // Logged, not raised: one rejected document must not poison the
            // batch or trigger redelivery of an otherwise-processed message.
            let body = resp.text().await.unwrap_or_default();
            error!(
                doc_id = %doc.id,
                status = status.as_u16(),
                body = %body.chars().take(500).collect::<String>(),
                "index upsert rejected"
            );
        }
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/{}/_search", self.endpoint, self.index);
        let body = serde_json::json!({
            "size": top_k,
            "query": {
                "multi_match": {
                    "query": query,
                    "fields": ["title^2", "text"]
                }
            },
            "_source": ["source", "title", "url"]
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("index search failed (HTTP {})", status);
        }

        let json: serde_json::Value = resp.json().await?;
        let hits = json
            .pointer("/hits/hits")
            .and_then(|h| h.as_array())
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        let src = hit.get("_source")?;
                        Some(SearchHit {
                            source: src.get("source")?.as_str()?.to_string(),
                            title: src
                                .get("title")
                                .and_then(|t| t.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            url: src
                                .get("url")
                                .and_then(|u| u.as_str())
                                .map(|u| u.to_string()),
                            score: hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }
}

// ============ In-memory backend ============

/// Non-durable index keyed by document id. Scoring counts term occurrences,
/// weighting title matches 2x over body text, mirroring the HTTP backend's
/// field boosts.
pub struct MemoryIndex {
    docs: RwLock<HashMap<String, UnifiedDocument>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored documents.
    pub async fn count(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn get(&self, id: &str) -> Option<UnifiedDocument> {
        self.docs.read().await.get(id).cloned()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, doc: &UnifiedDocument) -> Result<()> {
        self.docs.write().await.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().await;
        let mut scored: Vec<(f64, &UnifiedDocument)> = docs
            .values()
            .filter_map(|doc| {
                let title = doc.title.to_lowercase();
                let text = doc.text.to_lowercase();
                let score: f64 = terms
                    .iter()
                    .map(|t| {
                        2.0 * title.matches(t.as_str()).count() as f64
                            + text.matches(t.as_str()).count() as f64
                    })
                    .sum();
                (score > 0.0).then_some((score, doc))
            })
            .collect();

        // Stable order for equal scores so results are deterministic.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| SearchHit {
                source: doc.source.clone(),
                title: doc.title.clone(),
                url: doc.url.clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    fn doc(id: &str, title: &str, text: &str) -> UnifiedDocument {
        let mut d = UnifiedDocument::new(Source::Wiki, id.to_string(), title.to_string());
        d.text = text.to_string();
        d
    }

    #[tokio::test]
    async fn upsert_by_same_id_overwrites() {
        let index = MemoryIndex::new();
        index.upsert(&doc("wiki:1", "Old", "old text")).await.unwrap();
        index.upsert(&doc("wiki:1", "New", "new text")).await.unwrap();
        assert_eq!(index.count().await, 1);
        assert_eq!(index.get("wiki:1").await.unwrap().title, "New");
    }

    #[tokio::test]
    async fn title_matches_outrank_body_matches() {
        let index = MemoryIndex::new();
        index
            .upsert(&doc("wiki:1", "deploy runbook", "misc"))
            .await
            .unwrap();
        index
            .upsert(&doc("wiki:2", "misc", "deploy deploy notes"))
            .await
            .unwrap();

        let hits = index.search("deploy", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        // One title hit (weight 2) equals two body hits; ties break by id.
        assert_eq!(hits[0].title, "deploy runbook");
    }

    #[tokio::test]
    async fn search_honors_top_k_and_empty_query() {
        let index = MemoryIndex::new();
        for i in 0..5 {
            index
                .upsert(&doc(&format!("wiki:{}", i), "alpha", "alpha"))
                .await
                .unwrap();
        }
        assert_eq!(index.search("alpha", 3).await.unwrap().len(), 3);
        assert!(index.search("   ", 3).await.unwrap().is_empty());
    }
}
