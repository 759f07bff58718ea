use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::job::JobStatus;
use crate::models::submission::{SubmissionError, TaskStatusResponse};
use crate::services::job_store::JobStoreError;
use crate::services::queue::QueueError;

/// Errors surfaced by the parser API. Internal failures are reported by
/// category only.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Job store unavailable")]
    Store(#[from] JobStoreError),

    #[error("Queue unavailable")]
    Queue(#[from] QueueError),
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Queue(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Store(e) => tracing::error!(error = %e, "Job store request failed"),
            ApiError::Queue(e) => tracing::error!(error = %e, "Queue request failed"),
            _ => {}
        }

        let body = TaskStatusResponse {
            task_status: JobStatus::Error,
            message: None,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
