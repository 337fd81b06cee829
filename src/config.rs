use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Seconds a delivered message stays invisible before redelivery.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: i64,
    /// Delivery attempts before a message is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Worker idle sleep between empty receives.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_visibility_timeout() -> i64 {
    60
}
fn default_max_attempts() -> i64 {
    5
}
fn default_batch_size() -> i64 {
    10
}
fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecretsConfig {
    /// TOML file with one table per secret name. Environment variables of
    /// the form `NAME_FIELD` (uppercased) override file values.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub wiki: PollSourceConfig,
    #[serde(default)]
    pub issues: PollSourceConfig,
    #[serde(default)]
    pub code: CodeSourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollSourceConfig {
    /// Secret name holding base_url/user/api_token for this source.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Bootstrap window when no watermark exists yet.
    #[serde(default = "default_bootstrap_hours")]
    pub bootstrap_hours: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PollSourceConfig {
    fn default() -> Self {
        Self {
            secret: None,
            page_size: default_page_size(),
            bootstrap_hours: default_bootstrap_hours(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_page_size() -> usize {
    50
}
fn default_bootstrap_hours() -> i64 {
    24
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeSourceConfig {
    /// Secret name holding webhook_secret/api_token (and optional api_base).
    #[serde(default = "default_code_secret")]
    pub secret: String,
    /// Captured file content is truncated to this many characters.
    #[serde(default = "default_content_cap")]
    pub content_cap: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CodeSourceConfig {
    fn default() -> Self {
        Self {
            secret: default_code_secret(),
            content_cap: default_content_cap(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_code_secret() -> String {
    "code".to_string()
}
fn default_content_cap() -> usize {
    200_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// OpenAI-compatible embeddings endpoint.
    #[serde(default = "default_embed_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: default_embed_endpoint(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `http` (OpenSearch-compatible endpoint) or `memory` (non-durable).
    #[serde(default = "default_index_backend")]
    pub backend: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            endpoint: None,
            name: default_index_name(),
            top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_backend() -> String {
    "memory".to_string()
}
fn default_index_name() -> String {
    "unified".to_string()
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.queue.max_attempts < 1 {
        anyhow::bail!("queue.max_attempts must be >= 1");
    }
    if config.queue.batch_size < 1 {
        anyhow::bail!("queue.batch_size must be >= 1");
    }
    if config.queue.visibility_timeout_secs < 1 {
        anyhow::bail!("queue.visibility_timeout_secs must be >= 1");
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.index.backend.as_str() {
        "memory" => {}
        "http" => {
            if config.index.endpoint.is_none() {
                anyhow::bail!("index.endpoint is required when index.backend is 'http'");
            }
        }
        other => anyhow::bail!("Unknown index backend: '{}'. Must be http or memory.", other),
    }

    Ok(config)
}
