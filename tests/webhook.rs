//! Server integration tests: webhook verification, command ack, query API.

use axum::{routing::get, Json, Router};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use sqlx::SqlitePool;
use tempfile::TempDir;

use syncdex::config::{self, Config};
use syncdex::models::{ChangeEvent, Source, UnifiedDocument};
use syncdex::normalize::parse_event;
use syncdex::queue::IngestQueue;
use syncdex::server::{build_state, router};
use syncdex::{db, migrate};

const WEBHOOK_SECRET: &str = "hook-secret";

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Stub code-host API: commit detail plus raw file content.
async fn spawn_code_api() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let raw_base = base.clone();
    let app = Router::new()
        .route(
            "/repos/{owner}/{repo}/commits/{sha}",
            get(move || {
                let raw_base = raw_base.clone();
                async move {
                    Json(json!({
                        "files": [
                            {
                                "filename": "src/main.rs",
                                "status": "added",
                                "raw_url": format!("{}/raw/main.rs", raw_base)
                            },
                            {
                                "filename": "src/lib.rs",
                                "status": "modified",
                                "raw_url": format!("{}/raw/lib.rs", raw_base)
                            },
                            {
                                "filename": "legacy.rs",
                                "status": "removed",
                                "raw_url": format!("{}/raw/legacy.rs", raw_base)
                            }
                        ]
                    }))
                }
            }),
        )
        .route("/raw/main.rs", get(|| async { "fn main() {}" }))
        .route("/raw/lib.rs", get(|| async { "pub mod app;" }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

async fn setup(dir: &TempDir, api_base: &str) -> (Config, SqlitePool) {
    let db_path = dir.path().join("sdx.sqlite");
    let secrets_path = dir.path().join("secrets.toml");
    std::fs::write(
        &secrets_path,
        format!(
            r#"
[code]
webhook_secret = "{WEBHOOK_SECRET}"
api_token = "t"
api_base = "{api_base}"
"#
        ),
    )
    .unwrap();

    let config_path = dir.path().join("sdx.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[db]
path = "{}"

[secrets]
file = "{}"
"#,
            db_path.display(),
            secrets_path.display()
        ),
    )
    .unwrap();

    let config = config::load_config(&config_path).unwrap();
    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (config, pool)
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn push_payload() -> String {
    json!({
        "repository": {"full_name": "acme/app"},
        "commits": [{"id": "cafe", "message": "fix bug"}]
    })
    .to_string()
}

#[tokio::test]
async fn signed_push_enqueues_changed_files() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config.clone(), pool.clone()).unwrap();
    let server_base = spawn(router(state)).await;

    let body = push_payload();
    let resp = reqwest::Client::new()
        .post(format!("{}/hooks/code", server_base))
        .header("x-hub-signature-256", sign(body.as_bytes()))
        .header("x-github-event", "push")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let accepted: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(accepted["enqueued"], 2);

    // The added and modified files landed on the queue with their fetched
    // content; the removed file did not.
    let queue = IngestQueue::new(pool.clone(), &config.queue);
    let messages = queue.receive(10).await.unwrap();
    assert_eq!(messages.len(), 2);
    let mut files: Vec<(String, String)> = messages
        .iter()
        .map(|m| match parse_event(&m.body).unwrap() {
            ChangeEvent::CodeFile(file) => {
                assert_eq!(file.repo, "acme/app");
                assert_eq!(file.sha, "cafe");
                (file.path, file.content)
            }
            other => panic!("expected code file event, got {:?}", other),
        })
        .collect();
    files.sort();
    assert_eq!(
        files,
        vec![
            ("src/lib.rs".to_string(), "pub mod app;".to_string()),
            ("src/main.rs".to_string(), "fn main() {}".to_string()),
        ]
    );
}

#[tokio::test]
async fn tampered_signature_rejected_before_any_queue_write() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config.clone(), pool.clone()).unwrap();
    let server_base = spawn(router(state)).await;

    let body = push_payload();
    // Valid signature over a different body.
    let signature = sign(b"{\"something\":\"else\"}");

    let resp = reqwest::Client::new()
        .post(format!("{}/hooks/code", server_base))
        .header("x-hub-signature-256", signature)
        .header("x-github-event", "push")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let queue = IngestQueue::new(pool.clone(), &config.queue);
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn missing_signature_header_rejected() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config, pool).unwrap();
    let server_base = spawn(router(state)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/hooks/code", server_base))
        .header("x-github-event", "push")
        .body(push_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn non_push_event_relayed_as_raw() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config.clone(), pool.clone()).unwrap();
    let server_base = spawn(router(state)).await;

    let body = json!({"action": "opened", "issue": {"number": 5}}).to_string();
    let resp = reqwest::Client::new()
        .post(format!("{}/hooks/code", server_base))
        .header("x-hub-signature-256", sign(body.as_bytes()))
        .header("x-github-event", "issues")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let queue = IngestQueue::new(pool.clone(), &config.queue);
    let messages = queue.receive(10).await.unwrap();
    assert_eq!(messages.len(), 1);
    match parse_event(&messages[0].body).unwrap() {
        ChangeEvent::CodeRaw(raw) => assert_eq!(raw.event_type, "issues"),
        other => panic!("expected raw event, got {:?}", other),
    }
}

#[tokio::test]
async fn command_returns_immediate_ephemeral_ack() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config, pool).unwrap();
    let server_base = spawn(router(state)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/commands", server_base))
        .form(&[("text", "deploy runbook")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ack: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(ack["response_type"], "ephemeral");
    assert!(ack["text"].as_str().unwrap().contains("deploy runbook"));
}

#[tokio::test]
async fn query_endpoint_returns_cited_hits() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config, pool).unwrap();

    let mut doc = UnifiedDocument::new(
        Source::Wiki,
        "wiki:1".to_string(),
        "Deploy runbook".to_string(),
    );
    doc.url = Some("https://wiki.example.com/pages/1".to_string());
    doc.text = "how to deploy the service".to_string();
    state.index.upsert(&doc).await.unwrap();

    let server_base = spawn(router(state)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/query", server_base))
        .json(&json!({"query": "deploy"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let hits = body["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["source"], "wiki");
    assert_eq!(hits[0]["title"], "Deploy runbook");
    assert_eq!(
        hits[0]["url"],
        "https://wiki.example.com/pages/1"
    );
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = TempDir::new().unwrap();
    let api_base = spawn_code_api().await;
    let (config, pool) = setup(&dir, &api_base).await;
    let state = build_state(config, pool).unwrap();
    let server_base = spawn(router(state)).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/health", server_base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
