//! End-to-end runs: config-built jobs against a mock service, backed by SQLite.

use ducky::audit::{AuditKind, AuditSink};
use ducky::config::Config;
use ducky::dedup::DedupStore;
use ducky::jobs::{JobDeps, build_jobs};
use ducky::ratelimit::{RateLimiters, WindowStore};
use ducky::retry::RetryPolicy;
use ducky::scheduler::{JobContext, JobSelector, Scheduler, TaskOutcome};
use ducky::store::SqliteStore;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, db_path: &Path) -> Config {
    let yaml = format!(
        r#"
storage:
  db_path: {db}
rate_limits:
  write:
    min_delay_ms: 0
    max_calls_per_window: 50
    window_ms: 60000
  search:
    min_delay_ms: 0
    max_calls_per_window: 50
    window_ms: 60000
retry:
  max_attempts: 2
  base_delay_ms: 10
jobs:
  - name: reply-bot
    cron: "*/30 * * * *"
    description: Reply to mentions
    source:
      url: {uri}/search
      token_env: DUCKY_E2E_UNSET_SEARCH_TOKEN
    action:
      url: {uri}/reply
      token_env: DUCKY_E2E_UNSET_WRITE_TOKEN
    fetch_class: search
    batch:
      batch_delay_ms: 0
"#,
        db = db_path.display(),
        uri = server.uri()
    );
    Config::from_yaml(&yaml).unwrap()
}

fn scheduler_for(config: &Config, store: Arc<SqliteStore>) -> Scheduler {
    let window_store: Arc<dyn WindowStore> = store.clone();
    let audit: Arc<dyn AuditSink> = store.clone();
    let deps = JobDeps {
        dedup: store,
        limiters: RateLimiters::from_configs_with_store(&config.rate_limit_configs(), window_store).unwrap(),
        retry: RetryPolicy::new(config.retry.to_retry_config()),
        audit: audit.clone(),
        http_timeout: Duration::from_secs(5),
    };
    let mut scheduler = Scheduler::new(audit);
    for job in build_jobs(config, &deps, false).unwrap() {
        scheduler.register(job).unwrap();
    }
    scheduler
}

async fn mount_search(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "m1", "payload": {"text": "one"}},
                {"id": "m2", "payload": {"text": "two"}},
                {"id": "m3", "payload": {"text": "three"}}
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_live_run_acts_once_per_item_across_restarts() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    Mock::given(method("POST"))
        .and(path("/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outcome_ref": "r"})))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ducky.db");
    let config = config_for(&server, &db_path);
    config.validate().unwrap();

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let scheduler = scheduler_for(&config, store.clone());
        let outcomes = scheduler.run_once(None, JobContext::default()).await.unwrap();
        assert_eq!(outcomes, vec![("reply-bot".to_string(), TaskOutcome::Completed)]);
        assert_eq!(store.count_processed().unwrap(), 3);
    }

    // A fresh process over the same database must not act again
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    assert!(store.is_processed("m2").unwrap());
    let scheduler = scheduler_for(&config, store.clone());
    let outcomes = scheduler.run_once(Some(&JobSelector::Index(1)), JobContext::default()).await.unwrap();
    assert_eq!(outcomes[0].1, TaskOutcome::Completed);
    assert_eq!(store.count_processed().unwrap(), 3);

    let summaries: Vec<_> = store
        .recent_audit(Some("reply-bot"), 20)
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == AuditKind::RunSummary)
        .collect();
    assert_eq!(summaries.len(), 2);
    // Newest first: the second run skipped everything
    assert_eq!(summaries[0].data["items_processed"], json!(0));
    assert_eq!(summaries[0].data["items_skipped"], json!(3));
    assert_eq!(summaries[1].data["items_processed"], json!(3));
}

#[tokio::test]
async fn test_single_task_run_performs_actions() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    Mock::given(method("POST"))
        .and(path("/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outcome_ref": "r"})))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ducky.db");
    let config = config_for(&server, &db_path);
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let scheduler = scheduler_for(&config, store.clone());

    let outcomes = scheduler
        .run_once(Some(&JobSelector::Name("reply-bot".to_string())), JobContext::default())
        .await
        .unwrap();
    assert_eq!(outcomes, vec![("reply-bot".to_string(), TaskOutcome::Completed)]);
    assert_eq!(store.count_processed().unwrap(), 3);
    assert_eq!(store.get("m1").unwrap().unwrap().outcome_ref.as_deref(), Some("r"));
}

#[tokio::test]
async fn test_fatal_item_is_recorded_and_not_marked() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    Mock::given(method("POST"))
        .and(path("/reply"))
        .and(wiremock::matchers::body_partial_json(json!({"external_id": "m2"})))
        .respond_with(ResponseTemplate::new(403).set_body_string("blocked"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outcome_ref": "r"})))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ducky.db");
    let config = config_for(&server, &db_path);
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let scheduler = scheduler_for(&config, store.clone());

    let outcomes = scheduler.run_once(None, JobContext::default()).await.unwrap();
    assert_eq!(outcomes[0].1, TaskOutcome::Completed);

    assert!(store.is_processed("m1").unwrap());
    assert!(!store.is_processed("m2").unwrap());
    assert!(store.is_processed("m3").unwrap());

    let record = store.get("m2").unwrap().unwrap();
    assert_eq!(record.retry_count, 1);

    let summary = store
        .recent_audit(Some("reply-bot"), 10)
        .unwrap()
        .into_iter()
        .find(|e| e.kind == AuditKind::RunSummary)
        .unwrap();
    assert_eq!(summary.data["errors"][0]["external_id"], json!("m2"));
    assert_eq!(summary.data["errors"][0]["kind"], json!("fatal"));
}

#[tokio::test]
async fn test_dry_run_leaves_no_trace() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outcome_ref": "r"})))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ducky.db");
    let config = config_for(&server, &db_path);
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let scheduler = scheduler_for(&config, store.clone());

    let outcomes = scheduler
        .run_once(Some(&JobSelector::Name("reply-bot".to_string())), JobContext { dry_run: true })
        .await
        .unwrap();
    assert_eq!(outcomes[0].1, TaskOutcome::Completed);
    assert_eq!(store.count_processed().unwrap(), 0);
    assert!(store.get("m1").unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_source_fails_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ducky.db");
    let config = config_for(&server, &db_path);
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let scheduler = scheduler_for(&config, store.clone());

    let outcomes = scheduler.run_once(None, JobContext::default()).await.unwrap();
    assert!(outcomes[0].1.is_failed());

    let failures: Vec<_> = store
        .recent_audit(Some("reply-bot"), 10)
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == AuditKind::JobFailed)
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("every candidate fetch failed"));
}

#[tokio::test]
async fn test_unknown_task_selector() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ducky.db");
    let config = config_for(&server, &db_path);
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let scheduler = scheduler_for(&config, store);

    let result = scheduler.run_once(Some(&JobSelector::Index(5)), JobContext { dry_run: true }).await;
    assert!(result.is_err());
}
