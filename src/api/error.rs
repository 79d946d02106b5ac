//! API error taxonomy: one enum carrying an HTTP status
//! and a stable error code, rendered as `{ error: { code, message } }`.

use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::{ErrorBody, ErrorDetail};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),
    #[error("missing upload field: {0}")]
    MissingField(String),
    #[error("invalid job id: {0}")]
    InvalidId(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {0} is not completed (status: {1})")]
    NotCompleted(String, String),
    #[error("artifact storage error: {0}")]
    StorageError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::FileTooLarge(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidId(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotCompleted(_, _) => StatusCode::BAD_REQUEST,
            ApiError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::FileTooLarge(_) => "FILE_TOO_LARGE",
            ApiError::MissingField(_) => "VALIDATION_ERROR",
            ApiError::InvalidId(_) => "INVALID_ID",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::NotCompleted(_, _) => "NOT_COMPLETED",
            ApiError::StorageError(_) => "STORAGE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl From<crate::registry::RegistryError> for ApiError {
    fn from(value: crate::registry::RegistryError) -> Self {
        ApiError::Internal(value.to_string())
    }
}
