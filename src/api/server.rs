use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::services::{get_job_status, get_report, health, metrics, ready, upload_file};
use super::state::AppState;
use crate::config::Config;
use crate::observability::Metrics;
use crate::queue::FjallQueue;
use crate::registry::FjallRegistry;
use crate::storage::ArtifactStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Slack added to `DefaultBodyLimit` above `max_file_size` so multipart
/// framing (boundary markers, part headers) doesn't trip the aggregate
/// body limit before the handler's own size check runs. Without it, an
/// upload at or near the configured limit surfaces as a body-limit
/// `MultipartError` instead of the handler's `FILE_TOO_LARGE` response.
const MULTIPART_FRAMING_HEADROOM: usize = 64 * 1024;

/// Builds the router without binding a socket, so integration tests can
/// drive it directly with `tower::ServiceExt::oneshot`.
pub fn build_app(state: AppState) -> Router {
    let max_body = state.config.limits.max_file_size.as_u64() as usize + MULTIPART_FRAMING_HEADROOM;
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/api/v1/files", axum::routing::post(upload_file))
        .route("/api/v1/jobs/{id}", get(get_job_status))
        .route("/api/v1/reports/{id}", get(get_report))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(RequestDecompressionLayer::new())
}

fn cors_layer(origins: &str) -> CorsLayer {
    if origins.trim() == "*" {
        return CorsLayer::permissive();
    }

    let parsed: Vec<axum::http::HeaderValue> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    CorsLayer::new().allow_origin(parsed).allow_methods(tower_http::cors::Any)
}

/// Runs the submission-and-query process: binds the HTTP server and, by
/// default, also starts the in-process worker pool so a single `malscan
/// api` invocation is a complete deployment.
pub async fn run(
    config: Arc<Config>,
    registry: Arc<FjallRegistry>,
    storage: Arc<ArtifactStore>,
    queue: Arc<FjallQueue>,
    metrics: Arc<Metrics>,
    run_workers: bool,
) -> Result<(), AnyError> {
    let state = AppState {
        config: config.clone(),
        registry: registry.clone(),
        storage: storage.clone(),
        queue: queue.clone(),
        metrics: metrics.clone(),
    };

    let app = build_app(state);

    let worker_handle = if run_workers {
        let config = config.clone();
        let registry = registry.clone();
        let storage = storage.clone();
        let queue = queue.clone();
        let metrics = metrics.clone();
        Some(tokio::spawn(async move {
            crate::worker::run(config, registry, storage, queue, metrics).await
        }))
    } else {
        None
    };

    let address = config.server.bind_addr;
    let listener = TcpListener::bind(address).await?;
    info!(%address, "malscan API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
