//! Secret store collaborator.
//!
//! Credentials for each source live under a named table in a TOML secrets
//! file, e.g.:
//!
//! ```toml
//! [wiki]
//! base_url = "https://acme.example.com"
//! user = "bot@acme.example.com"
//! api_token = "..."
//!
//! [code]
//! webhook_secret = "..."
//! api_token = "..."
//! api_base = "https://api.github.com"
//! ```
//!
//! Environment variables of the form `NAME_FIELD` (uppercased, `-` mapped to
//! `_`) override file values, so deployments can keep tokens out of files
//! entirely. A missing secret or field aborts the connector run.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::config::SecretsConfig;

/// Named credential sets resolved from file and environment.
pub struct SecretStore {
    tables: HashMap<String, toml::Table>,
}

impl SecretStore {
    pub fn load(config: &SecretsConfig) -> Result<SecretStore> {
        let tables = match &config.file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
                let root: toml::Table =
                    toml::from_str(&content).with_context(|| "Failed to parse secrets file")?;
                root.into_iter()
                    .filter_map(|(name, value)| match value {
                        toml::Value::Table(t) => Some((name, t)),
                        _ => None,
                    })
                    .collect()
            }
            None => HashMap::new(),
        };
        Ok(SecretStore { tables })
    }

    /// Look up one field of a named secret. Environment wins over file.
    pub fn get(&self, name: &str, field: &str) -> Result<String> {
        if let Ok(value) = std::env::var(env_key(name, field)) {
            return Ok(value);
        }
        self.tables
            .get(name)
            .and_then(|t| t.get(field))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("secret '{}' has no field '{}'", name, field))
    }

    /// Like [`get`](Self::get), but absence is not an error.
    pub fn get_optional(&self, name: &str, field: &str) -> Option<String> {
        self.get(name, field).ok()
    }
}

fn env_key(name: &str, field: &str) -> String {
    format!("{}_{}", name, field)
        .to_uppercase()
        .replace('-', "_")
}

/// Credentials for a poll source's HTTP API (basic auth).
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub base_url: String,
    pub user: String,
    pub token: String,
}

impl ApiCredentials {
    pub fn resolve(store: &SecretStore, name: &str) -> Result<ApiCredentials> {
        Ok(ApiCredentials {
            base_url: store
                .get(name, "base_url")?
                .trim_end_matches('/')
                .to_string(),
            user: store.get(name, "user")?,
            token: store.get(name, "api_token")?,
        })
    }
}

/// Credentials for the code source: webhook verification plus API access.
#[derive(Debug, Clone)]
pub struct CodeCredentials {
    pub webhook_secret: String,
    pub token: String,
    pub api_base: String,
}

impl CodeCredentials {
    pub fn resolve(store: &SecretStore, name: &str) -> Result<CodeCredentials> {
        Ok(CodeCredentials {
            webhook_secret: store.get(name, "webhook_secret")?,
            token: store.get(name, "api_token")?,
            api_base: store
                .get_optional(name, "api_base")
                .unwrap_or_else(|| "https://api.github.com".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}
