mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::{bundle, test_app, KeywordEncoder, RecordingLlm};
use rani::llm::LlmClient;
use rani::server::{build_router, AppState};

fn router(root: &std::path::Path, reply: &str) -> axum::Router {
    let app = test_app(root, Arc::new(KeywordEncoder::default()), false);
    let llm: Arc<dyn LlmClient> = Arc::new(RecordingLlm::replying(reply));
    build_router(AppState::new(&app, llm))
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_reports_loaded_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path(), "ok");

    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["product"], "pro");
    assert_eq!(body["total_chunks"], 0);
}

#[tokio::test]
async fn ingest_then_chat_and_search() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path(), "Filters select rows.");

    let (status, body) = send(
        &router,
        post(
            "/ingest",
            bundle(
                "8.0",
                &[("c1", "A filter selects rows."), ("c2", "Workflows automate tasks.")],
            ),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["version"], "8-0");
    assert_eq!(body["chunks"], 2);
    assert_eq!(body["persisted"], true);

    let (status, body) = send(&router, get("/versions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], "8-0");
    assert_eq!(body["loaded"]["8-0"], 2);

    let (status, body) = send(
        &router,
        post(
            "/chat",
            json!({ "query": "filter", "version": "v8.0", "min_similarity": 0.1 }).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Filters select rows.");
    assert_eq!(body["context_used"].as_array().unwrap().len(), 1);
    assert_eq!(body["context_used"][0]["version"], "8-0");
    assert_eq!(body["sources_count"], 1);
    assert_eq!(body["model_used"], "recording-llm");
    assert!(body["processing_time_ms"].is_u64());

    let (status, body) = send(
        &router,
        post(
            "/search",
            json!({ "query": "workflow", "max_results": 1, "min_similarity": 0.1 }).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["effective_version"], "8-0");
    assert_eq!(body["results"][0]["id"], "c2");
    assert_eq!(body["results"][0]["version_match"], true);
}

#[tokio::test]
async fn chat_validation_errors_use_error_envelope() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path(), "ok");

    for payload in [
        json!({ "query": "  " }),
        json!({ "query": "x".repeat(1001) }),
        json!({ "query": "filter", "max_results": 0 }),
        json!({ "query": "filter", "max_results": 21 }),
        json!({ "query": "filter", "min_similarity": 1.5 }),
    ] {
        let (status, body) = send(&router, post("/chat", payload.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", payload);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    let (status, body) = send(&router, post("/chat", "{ nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn chat_on_empty_index_is_not_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path(), "A filter narrows results. https://example.com/x");

    let (status, body) = send(
        &router,
        post("/chat", json!({ "query": "What is a filter?", "version": "8-0" }).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["context_used"].as_array().unwrap().is_empty());
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("No exact matches found in Resolve Pro documentation."));
    assert!(!message.contains("http"));
}

#[tokio::test]
async fn bad_ingest_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let router = router(tmp.path(), "ok");

    let (status, body) = send(&router, post("/ingest", bundle("9-9", &[("x", "filter")]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(&router, post("/ingest", Body::empty())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (_, body) = send(&router, get("/health")).await;
    assert_eq!(body["total_chunks"], 0);
}
