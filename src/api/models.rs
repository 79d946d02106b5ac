//! HTTP request/response shapes for the submission and query surface
//! Built from [`crate::model`] rather than duplicating its
//! fields as a second source of truth.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{Job, Report};

/// `POST /api/v1/files` success body.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub file_id: Uuid,
    pub sha256: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

/// `GET /api/v1/jobs/{id}` success body.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub progress: Progress,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Progress {
    pub current_stage: Option<String>,
    pub stages_done: u32,
    pub stages_total: u32,
    pub percent: u32,
}

impl JobStatusResponse {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status.as_str(),
            progress: Progress {
                current_stage: job.current_stage.clone(),
                stages_done: job.stages_done,
                stages_total: job.stages_total,
                percent: job.percent(),
            },
            updated_at: job.updated_at,
            error_message: job.error_message.clone(),
        }
    }
}

/// `GET /api/v1/reports/{id}` success body: the stored [`Report`] plus the
/// file summary and `created_at` rendered as an ISO-8601 string for this
/// endpoint.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub job_id: Uuid,
    pub file: ReportFile,
    #[serde(flatten)]
    pub report: Report,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ReportFile {
    pub file_id: Uuid,
    pub sha256: String,
    pub mime: String,
    pub size: u64,
    pub original_filename: String,
}

/// `{ error: { code, message, details? } }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct StatusOkResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn job_status_response_reports_percent() {
        let mut job = Job::new(Uuid::new_v4(), 5);
        job.stages_done = 2;
        job.current_stage = Some("yara".to_string());
        let response = JobStatusResponse::from_job(&job);
        assert_eq!(response.progress.percent, 40);
        assert_eq!(response.progress.current_stage.as_deref(), Some("yara"));
    }
}
