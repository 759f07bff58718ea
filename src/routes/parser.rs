use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::job::{short_id, JobStatus};
use crate::models::submission::{JobSubmission, SubmitResponse, TaskStatusResponse};
use crate::routes::error::ApiError;
use crate::services::completion::PollOutcome;
use crate::services::queue::QueueEnvelope;

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(t) if !token.is_empty() && t == token => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// POST /parser/start_task: accept a batch of account checks.
///
/// The job is stored before any envelope is queued, so a worker never sees
/// a sub-task whose job does not exist yet. If queueing fails part way the
/// job is marked `error`, which stops workers from running the sub-tasks
/// that did get queued.
pub async fn start_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<JobSubmission>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    authorize(&headers, &state.api_token)?;
    let Json(submission) = body?;
    submission.check()?;

    let job = submission.into_job(short_id());
    state.jobs.create(&job).await?;

    let queue = state.submit_queue();
    for payload in job.payloads() {
        let envelope = QueueEnvelope::new(short_id(), payload);
        if let Err(e) = state.broker.push(queue, &envelope).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to queue sub-task");
            if let Err(fail) = state.aggregator.fail_job(&job.job_id).await {
                tracing::error!(job_id = %job.job_id, error = %fail, "Failed to mark job as failed");
            }
            return Err(e.into());
        }
    }

    metrics::counter!("jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job.job_id,
        owner_id = %job.owner_id,
        subtasks = job.data.len(),
        queue,
        "Job accepted"
    );

    Ok(Json(SubmitResponse {
        task_id: job.job_id,
        task_status: JobStatus::Processing,
    }))
}

/// GET /parser/result/{task_id}: poll a job.
pub async fn get_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;

    match state.aggregator.poll(&task_id).await? {
        PollOutcome::Processing => {
            let body = TaskStatusResponse {
                task_status: JobStatus::Processing,
                message: Some("Task is still processing".to_string()),
                error: None,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        PollOutcome::Complete(job) => Ok(Json(job).into_response()),
        PollOutcome::NotFound => Err(ApiError::NotFound(task_id)),
    }
}
