//! Connector integration tests against stub upstream APIs.

use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

use syncdex::checkpoint::CheckpointStore;
use syncdex::config::{self, Config};
use syncdex::connector_issues::sync_issues;
use syncdex::connector_wiki::sync_wiki;
use syncdex::models::{ChangeEvent, Source};
use syncdex::normalize::parse_event;
use syncdex::queue::IngestQueue;
use syncdex::{db, migrate};

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Timestamp safely inside any bootstrap window regardless of wall clock.
fn recent(minutes_ago: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::minutes(minutes_ago))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

async fn setup(dir: &TempDir, wiki_base: &str, issues_base: &str) -> (Config, SqlitePool) {
    let db_path = dir.path().join("sdx.sqlite");
    let secrets_path = dir.path().join("secrets.toml");
    std::fs::write(
        &secrets_path,
        format!(
            r#"
[wiki]
base_url = "{wiki_base}"
user = "bot"
api_token = "t"

[issues]
base_url = "{issues_base}"
user = "bot"
api_token = "t"
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

/// Wiki API stub serving the given page ids, all with the same modification
/// timestamp. Content fetches for ids in `failing` return a 500.
fn wiki_stub(page_ids: Vec<&'static str>, updated: String, failing: Vec<&'static str>) -> Router {
    let results: Vec<serde_json::Value> = page_ids
        .iter()
        .map(|id| json!({"content": {"type": "page", "id": id}}))
        .collect();
    let total = results.len();
    Router::new()
        .route(
            "/wiki/rest/api/search",
            get(move || {
                let results = results.clone();
                async move { Json(json!({"results": results, "totalSize": total})) }
            }),
        )
        .route(
            "/wiki/rest/api/content/{id}",
            get(move |Path(id): Path<String>| {
                let updated = updated.clone();
                let failing = failing.clone();
                async move {
                    if failing.contains(&id.as_str()) {
                        return Err(StatusCode::INTERNAL_SERVER_ERROR);
                    }
                    Ok(Json(json!({
                        "id": id,
                        "title": format!("Page {}", id),
                        "space": {"key": "ENG"},
                        "ancestors": [{"title": "Home"}],
                        "version": {"when": updated},
                        "body": {"storage": {"value": "<p>content</p>"}},
                        "_links": {"webui": format!("/pages/{id}")}
                    })))
                }
            }),
        )
}

#[tokio::test]
async fn wiki_bootstrap_enqueues_page_and_sets_watermark() {
    let dir = TempDir::new().unwrap();
    let updated = recent(5);
    let wiki_base = spawn(wiki_stub(vec!["1"], updated.clone(), vec![])).await;
    let (config, pool) = setup(&dir, &wiki_base, "http://unused.invalid").await;

    // No prior watermark: the run bootstraps from the recent window.
    let summary = sync_wiki(&config, &pool).await.unwrap();
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.latest, updated);

    let checkpoints = CheckpointStore::new(pool.clone());
    assert_eq!(
        checkpoints.get(Source::Wiki, "lastmodified").await.unwrap(),
        Some(updated)
    );

    let queue = IngestQueue::new(pool.clone(), &config.queue);
    let messages = queue.receive(10).await.unwrap();
    assert_eq!(messages.len(), 1);
    match parse_event(&messages[0].body).unwrap() {
        ChangeEvent::WikiPage(page) => {
            assert_eq!(page.id, "1");
            assert_eq!(page.title, "Page 1");
            assert_eq!(page.space.as_deref(), Some("ENG"));
        }
        other => panic!("expected wiki page event, got {:?}", other),
    }
}

#[tokio::test]
async fn wiki_boundary_siblings_both_enqueued() {
    let dir = TempDir::new().unwrap();
    let boundary = recent(10);
    let wiki_base = spawn(wiki_stub(vec!["1", "2"], boundary.clone(), vec![])).await;
    let (config, pool) = setup(&dir, &wiki_base, "http://unused.invalid").await;

    // Both pages sit exactly on the stored watermark; the inclusive delta
    // query must surface both.
    let checkpoints = CheckpointStore::new(pool.clone());
    checkpoints
        .put(Source::Wiki, "lastmodified", &boundary)
        .await
        .unwrap();

    let summary = sync_wiki(&config, &pool).await.unwrap();
    assert_eq!(summary.enqueued, 2);
    assert_eq!(summary.latest, boundary);
}

#[tokio::test]
async fn wiki_failure_mid_run_leaves_watermark_untouched() {
    let dir = TempDir::new().unwrap();
    let wiki_base = spawn(wiki_stub(vec!["1", "2"], recent(5), vec!["2"])).await;
    let (config, pool) = setup(&dir, &wiki_base, "http://unused.invalid").await;

    let old = recent(120);
    let checkpoints = CheckpointStore::new(pool.clone());
    checkpoints
        .put(Source::Wiki, "lastmodified", &old)
        .await
        .unwrap();

    assert!(sync_wiki(&config, &pool).await.is_err());

    // Page 1 was enqueued before the failure (at-least-once allows the
    // partial batch), but the watermark did not move, so the next run
    // re-covers the whole window.
    assert_eq!(
        checkpoints.get(Source::Wiki, "lastmodified").await.unwrap(),
        Some(old)
    );
    let queue = IngestQueue::new(pool.clone(), &config.queue);
    assert_eq!(queue.depth().await.unwrap(), 1);
}

fn issues_stub(issue_updated: String, comment_updated: Vec<String>) -> Router {
    let comments: Vec<serde_json::Value> = comment_updated
        .iter()
        .enumerate()
        .map(|(i, updated)| {
            json!({
                "id": format!("{}", 900 + i),
                "body": {"content": [{"content": [{"text": format!("comment {}", i)}]}]},
                "author": {"displayName": "Sam"},
                "updated": updated
            })
        })
        .collect();
    Router::new()
        .route(
            "/rest/api/3/search",
            get(move || {
                let issue_updated = issue_updated.clone();
                async move {
                    Json(json!({
                        "issues": [{
                            "key": "ENG-1",
                            "fields": {
                                "summary": "Crash on save",
                                "description": {"content": [{"content": [{"text": "boom"}]}]},
                                "updated": issue_updated,
                                "project": {"key": "ENG"},
                                "status": {"name": "Open"},
                                "labels": ["bug"]
                            }
                        }],
                        "total": 1
                    }))
                }
            }),
        )
        .route(
            "/rest/api/3/issue/{key}/comment",
            get(move |Path(_key): Path<String>| {
                let comments = comments.clone();
                async move { Json(json!({"comments": comments})) }
            }),
        )
}

#[tokio::test]
async fn issue_with_two_comments_yields_three_events() {
    let dir = TempDir::new().unwrap();
    let issue_updated = recent(30);
    let newest_comment = recent(2);
    let issues_base = spawn(issues_stub(
        issue_updated,
        vec![recent(20), newest_comment.clone()],
    ))
    .await;
    let (config, pool) = setup(&dir, "http://unused.invalid", &issues_base).await;

    let checkpoints = CheckpointStore::new(pool.clone());
    checkpoints
        .put(Source::Issues, "updated", &recent(60))
        .await
        .unwrap();

    let summary = sync_issues(&config, &pool).await.unwrap();
    assert_eq!(summary.enqueued, 3);

    // A comment is newer than the issue itself; the watermark tracks the
    // newest item actually emitted.
    assert_eq!(summary.latest, newest_comment);
    assert_eq!(
        checkpoints.get(Source::Issues, "updated").await.unwrap(),
        Some(newest_comment)
    );

    let queue = IngestQueue::new(pool.clone(), &config.queue);
    let messages = queue.receive(10).await.unwrap();
    let mut kinds: Vec<&str> = messages
        .iter()
        .map(|m| match parse_event(&m.body).unwrap() {
            ChangeEvent::Issue(_) => "issue",
            ChangeEvent::Comment(_) => "comment",
            _ => "other",
        })
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["comment", "comment", "issue"]);
}

#[tokio::test]
async fn stale_comments_do_not_move_watermark_past_issue() {
    let dir = TempDir::new().unwrap();
    let issue_updated = recent(5);
    let issues_base = spawn(issues_stub(issue_updated.clone(), vec![recent(300)])).await;
    let (config, pool) = setup(&dir, "http://unused.invalid", &issues_base).await;

    let checkpoints = CheckpointStore::new(pool.clone());
    checkpoints
        .put(Source::Issues, "updated", &recent(600))
        .await
        .unwrap();

    let summary = sync_issues(&config, &pool).await.unwrap();
    assert_eq!(summary.enqueued, 2);
    assert_eq!(summary.latest, issue_updated);
}
