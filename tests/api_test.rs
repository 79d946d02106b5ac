use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use malscan::api::state::AppState;
use malscan::api::build_app;
use malscan::config::Config;
use malscan::humanize::ByteSize;
use malscan::observability::Metrics;
use malscan::queue::FjallQueue;
use malscan::registry::FjallRegistry;
use malscan::storage::ArtifactStore;

const BOUNDARY: &str = "malscan-test-boundary";

fn multipart_body(filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(bytes: &[u8]) -> Request<Body> {
    Request::builder()
        .uri("/api/v1/files")
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("sample.bin", "application/octet-stream", bytes)))
        .unwrap()
}

async fn build_test_app(max_file_size: Option<u64>) -> (axum::Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(FjallRegistry::open(dir.path().join("registry")).unwrap());
    let storage = Arc::new(ArtifactStore::in_memory());
    let queue = Arc::new(FjallQueue::open(dir.path().join("queue"), "malscan.jobs", "malscan-dlq").unwrap());
    let metrics = Arc::new(Metrics::new());

    let mut config = Config::default();
    if let Some(size) = max_file_size {
        config.limits.max_file_size = ByteSize(size);
    }
    let config = Arc::new(config);

    let state = AppState {
        config,
        registry,
        storage,
        queue,
        metrics,
    };

    (build_app(state), dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn upload_accepts_file_and_queues_job() {
    let (app, _dir) = build_test_app(None).await;

    let response = app.oneshot(upload_request(b"hello world")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert!(body["job_id"].is_string());
    assert_eq!(body["sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn uploading_same_bytes_twice_dedups_file_but_creates_two_jobs() {
    let (app, _dir) = build_test_app(None).await;

    let first = app.clone().oneshot(upload_request(b"duplicate content")).await.unwrap();
    let first = body_json(first).await;

    let second = app.oneshot(upload_request(b"duplicate content")).await.unwrap();
    let second = body_json(second).await;

    assert_eq!(first["sha256"], second["sha256"]);
    assert_eq!(first["file_id"], second["file_id"]);
    assert_ne!(first["job_id"], second["job_id"]);
}

#[tokio::test]
async fn upload_rejects_oversize_payload() {
    let (app, _dir) = build_test_app(Some(4)).await;

    let response = app.oneshot(upload_request(b"this is too long")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn job_status_rejects_malformed_id() {
    let (app, _dir) = build_test_app(None).await;

    let request = Request::builder()
        .uri("/api/v1/jobs/not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_status_returns_404_for_unknown_job() {
    let (app, _dir) = build_test_app(None).await;

    let request = Request::builder()
        .uri(format!("/api/v1/jobs/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_status_reflects_freshly_queued_job() {
    let (app, _dir) = build_test_app(None).await;

    let uploaded = app.clone().oneshot(upload_request(b"track me")).await.unwrap();
    let uploaded = body_json(uploaded).await;
    let job_id = uploaded["job_id"].as_str().unwrap();

    let request = Request::builder()
        .uri(format!("/api/v1/jobs/{job_id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["progress"]["percent"], 0);
}

#[tokio::test]
async fn report_rejects_job_not_yet_completed() {
    let (app, _dir) = build_test_app(None).await;

    let uploaded = app.clone().oneshot(upload_request(b"not done yet")).await.unwrap();
    let uploaded = body_json(uploaded).await;
    let job_id = uploaded["job_id"].as_str().unwrap();

    let request = Request::builder()
        .uri(format!("/api/v1/reports/{job_id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_COMPLETED");
}

#[tokio::test]
async fn health_and_ready_and_metrics_endpoints_respond() {
    let (app, _dir) = build_test_app(None).await;

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let ready = app
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    let metrics = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}
