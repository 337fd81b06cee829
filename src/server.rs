//! HTTP surface: webhook receiver, chat command ack, query endpoint.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::connector_code;
use crate::index::{create_index, SearchHit, SearchIndex};
use crate::queue::IngestQueue;
use crate::secrets::{CodeCredentials, SecretStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub index: Arc<dyn SearchIndex>,
    pub code_creds: CodeCredentials,
    pub client: reqwest::Client,
}

pub fn build_state(config: Config, pool: SqlitePool) -> Result<AppState> {
    let store = SecretStore::load(&config.secrets)?;
    let code_creds = CodeCredentials::resolve(&store, &config.sources.code.secret)
        .context("resolving code webhook credentials")?;
    let index = create_index(&config.index)?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sources.code.timeout_secs))
        .build()?;
    Ok(AppState {
        config,
        pool,
        index,
        code_creds,
        client,
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/hooks/code", post(code_hook))
        .route("/commands", post(command))
        .route("/query", post(query))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(config: Config, pool: SqlitePool) -> Result<()> {
    let bind = config.server.bind.clone();
    let state = build_state(config, pool)?;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!(%bind, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct HookResponse {
    enqueued: u64,
}

async fn code_hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<HookResponse>), AppError> {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&state.code_creds.webhook_secret, &body, signature) {
        warn!("webhook signature rejected");
        return Err(AppError(
            StatusCode::UNAUTHORIZED,
            "invalid signature".to_string(),
        ));
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError(StatusCode::BAD_REQUEST, format!("invalid payload: {}", e)))?;

    let queue = IngestQueue::new(state.pool.clone(), &state.config.queue);
    let enqueued = connector_code::process_delivery(
        &state.client,
        &state.code_creds,
        state.config.sources.code.content_cap,
        &queue,
        &event_type,
        payload,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(HookResponse { enqueued })))
}

/// Constant-time check of `sha256=<hex>` against the HMAC of the raw body.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Deserialize)]
struct CommandForm {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct CommandAck {
    response_type: String,
    text: String,
}

/// Immediate ephemeral acknowledgement; chat platforms require a reply
/// within their deadline, so the search itself is not performed here.
async fn command(Form(form): Form<CommandForm>) -> Json<CommandAck> {
    Json(CommandAck {
        response_type: "ephemeral".to_string(),
        text: format!("Searching for: {}", form.text),
    })
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub hits: Vec<SearchHit>,
}

async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let top_k = req.top_k.unwrap_or(state.config.index.top_k);
    let hits = state.index.search(&req.query, top_k).await?;
    Ok(Json(QueryResponse { hits }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_roundtrip_accepts() {
        let body = b"{\"zen\":\"keep it simple\"}";
        let header = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &header));
    }

    #[test]
    fn tampered_body_rejected() {
        let header = sign("topsecret", b"first body");
        assert!(!verify_signature("topsecret", b"tampered", &header));
    }

    #[test]
    fn wrong_secret_rejected() {
        let body = b"payload";
        let header = sign("one", body);
        assert!(!verify_signature("two", body, &header));
    }

    #[test]
    fn malformed_header_rejected() {
        assert!(!verify_signature("s", b"x", ""));
        assert!(!verify_signature("s", b"x", "sha1=abcd"));
        assert!(!verify_signature("s", b"x", "sha256=nothex"));
    }
}
