//! Request handlers for the submission and query surface.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use sha2::{Digest, Sha256};
use tracing::{error, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::models::{
    JobStatusResponse, ReportFile, ReportResponse, StatusOkResponse, UploadResponse,
};
use super::state::AppState;
use crate::model::{File, Job, JobStatus, QueueMessage};

/// `POST /api/v1/files` — accept a multipart upload, dedup by digest, queue
/// a job for it.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let max_size = state.config.limits.max_file_size.as_u64();

    let mut bytes: Option<Vec<u8>> = None;
    let mut filename = "upload.bin".to_string();
    let mut content_type = "application/octet-stream".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::MissingField(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| filename.clone());
        content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| content_type.clone());

        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::MissingField(err.to_string()))?;

        if data.len() as u64 > max_size {
            return Err(ApiError::FileTooLarge(data.len() as u64));
        }

        bytes = Some(data.to_vec());
    }

    let bytes = bytes.ok_or_else(|| ApiError::MissingField("file".to_string()))?;
    if bytes.len() as u64 > max_size {
        return Err(ApiError::FileTooLarge(bytes.len() as u64));
    }

    let sha256 = format!("{:x}", Sha256::digest(&bytes));

    state
        .storage
        .put(&sha256, bytes.clone(), &content_type)
        .await
        .map_err(|err| ApiError::StorageError(err.to_string()))?;

    let size = bytes.len() as u64;
    let registry = state.registry.clone();
    let sha256_for_file = sha256.clone();
    let filename_for_file = filename.clone();
    let content_type_for_file = content_type.clone();
    let file = tokio::task::spawn_blocking(move || {
        registry.insert_file(File {
            id: Uuid::new_v4(),
            sha256: sha256_for_file,
            size,
            filename: filename_for_file,
            content_type: content_type_for_file,
            created_at: chrono::Utc::now(),
        })
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))?
    .map_err(|err| ApiError::Internal(err.to_string()))?;

    let stages_total = state.config.pipeline.stages_total;
    let registry = state.registry.clone();
    let job = tokio::task::spawn_blocking(move || registry.insert_job(Job::new(file.id, stages_total)))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let queue = state.queue.clone();
    let message = QueueMessage {
        job_id: job.id,
        file_id: file.id,
        storage_key: sha256.clone(),
        sha256: sha256.clone(),
        original_filename: filename.clone(),
    };
    let publish_result =
        tokio::task::spawn_blocking(move || queue.publish(message)).await;
    match publish_result {
        Ok(Ok(_seq)) => {}
        Ok(Err(err)) => {
            // The job row is already committed, so the client still gets a
            // job_id it can poll; the failure is logged and left for an
            // operator to republish.
            error!(job_id = %job.id, error = %err, "failed to publish job to queue");
        }
        Err(err) => {
            error!(job_id = %job.id, error = %err, "queue publish task panicked");
        }
    }

    state.metrics.job_accepted();

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            job_id: job.id,
            file_id: file.id,
            sha256,
            status: "queued",
            created_at: job.created_at,
        }),
    ))
}

/// `GET /api/v1/jobs/{id}`.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let registry = state.registry.clone();
    let job = tokio::task::spawn_blocking(move || registry.read_job(&job_id))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;

    Ok(Json(JobStatusResponse::from_job(&job)))
}

/// `GET /api/v1/reports/{id}`.
pub async fn get_report(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let registry = state.registry.clone();
    let job = tokio::task::spawn_blocking(move || registry.read_job(&job_id))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;

    if job.status != JobStatus::Done {
        return Err(ApiError::NotCompleted(
            job_id.to_string(),
            job.status.as_str().to_string(),
        ));
    }

    let report = job
        .result
        .clone()
        .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;

    let registry = state.registry.clone();
    let file = tokio::task::spawn_blocking(move || registry.get_file(&job.file_id))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or_else(|| ApiError::NotFound(job.file_id.to_string()))?;

    Ok(Json(ReportResponse {
        job_id,
        file: ReportFile {
            file_id: file.id,
            sha256: file.sha256,
            mime: file.content_type,
            size: file.size,
            original_filename: file.filename,
        },
        report,
        created_at: file.created_at.to_rfc3339(),
    }))
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::InvalidId(raw.to_string()))
}

pub async fn health() -> impl IntoResponse {
    Json(StatusOkResponse { status: "ok" })
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.queue.health_check().is_ok() {
        (StatusCode::OK, Json(StatusOkResponse { status: "ready" }))
    } else {
        warn!("readiness check failed: queue unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusOkResponse { status: "not_ready" }),
        )
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
