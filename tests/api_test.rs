mod common;

use article_processor::api::{router, AppState};
use article_processor::{
    Article, ArticleStore, MemoryArticleStore, ProcessEngine, ProcessStage, ProcessStatus,
};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn test_app(store: Arc<MemoryArticleStore>) -> Router {
    let store: Arc<dyn ArticleStore> = store;
    let engine = ProcessEngine::new(
        store.clone(),
        Arc::new(ScriptedExtractor::new()),
        Arc::new(ScriptedAnalyzer::new()),
    );
    router(AppState { engine, store })
}

async fn request(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn failed_article(id: &str, minutes: i64, stage: ProcessStage) -> Article {
    let mut a = article(id, minutes);
    a.process_status = ProcessStatus::Failed;
    a.process_stage = Some(stage);
    a.process_error = Some(format!("boom {id}"));
    a
}

#[tokio::test]
async fn stats_report_counts_per_status() {
    let store = Arc::new(MemoryArticleStore::new());
    let mut done = article("d1", 0);
    done.process_status = ProcessStatus::Done;
    seed(
        &store,
        &[
            article("s1", 0),
            done,
            failed_article("f1", 1, ProcessStage::Fetch),
        ],
    )
    .await;

    let app = test_app(store);
    let (status, body) = request(&app, "GET", "/api/process/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synced"], 1);
    assert_eq!(body["done"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn progress_reports_idle_before_any_run() {
    let app = test_app(Arc::new(MemoryArticleStore::new()));
    let (status, body) = request(&app, "GET", "/api/process/progress").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["total"], 0);
    assert_eq!(body["current"], Value::Null);
}

#[tokio::test]
async fn start_reports_the_selected_count() {
    let store = Arc::new(MemoryArticleStore::new());
    seed(&store, &[article("a1", 0), article("a2", 1)]).await;

    let app = test_app(store);
    let (status, body) = request(&app, "POST", "/api/process/start").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert_eq!(body["selected"], 2);
}

#[tokio::test]
async fn control_errors_map_to_conflict() {
    let app = test_app(Arc::new(MemoryArticleStore::new()));

    for op in ["pause", "resume", "stop"] {
        let (status, body) = request(&app, "POST", &format!("/api/process/{op}")).await;
        assert_eq!(status, StatusCode::CONFLICT, "{op} while idle");
        let error = body["error"].as_str().unwrap();
        assert!(error.contains(op), "error should name the operation: {error}");
    }
}

#[tokio::test]
async fn failed_listing_paginates() {
    let store = Arc::new(MemoryArticleStore::new());
    seed(
        &store,
        &[
            failed_article("f1", 0, ProcessStage::Fetch),
            failed_article("f2", 1, ProcessStage::Analysis),
            failed_article("f3", 2, ProcessStage::Fetch),
        ],
    )
    .await;

    let app = test_app(store);

    let (status, body) = request(&app, "GET", "/api/process/failed?page=1&page_size=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["items"][0]["article_id"], "f1");
    assert_eq!(body["items"][0]["stage"], "fetch");
    assert_eq!(body["items"][0]["error"], "boom f1");

    let (_, body) = request(&app, "GET", "/api/process/failed?page=2&page_size=2").await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["article_id"], "f3");
}

#[tokio::test]
async fn retry_resets_failures_by_stage() {
    let store = Arc::new(MemoryArticleStore::new());
    seed(
        &store,
        &[
            failed_article("f1", 0, ProcessStage::Fetch),
            failed_article("f2", 1, ProcessStage::Analysis),
        ],
    )
    .await;

    let app = test_app(store.clone());
    let (status, body) = request(&app, "POST", "/api/process/retry").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset"], 2);

    let f1 = store.get("f1").await.unwrap().unwrap();
    let f2 = store.get("f2").await.unwrap().unwrap();
    assert_eq!(f1.process_status, ProcessStatus::PendingFetch);
    assert_eq!(f2.process_status, ProcessStatus::PendingAnalysis);
    assert_eq!(f1.process_error, None);
    assert_eq!(f2.process_stage, None);

    let (_, stats) = request(&app, "GET", "/api/process/stats").await;
    assert_eq!(stats["failed"], 0);
    assert_eq!(stats["pending_fetch"], 1);
    assert_eq!(stats["pending_analysis"], 1);
}
