use std::collections::HashSet;

use chrono::Utc;
use garde::Validate;
use serde::{Deserialize, Serialize};

use super::job::{deserialize_flag, AccountType, Job, JobStatus, SubTask, Utility};

/// Body of `POST /parser/start_task`.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct JobSubmission {
    #[garde(length(min = 1, max = 64))]
    #[serde(alias = "tg_id")]
    pub owner_id: String,

    #[garde(skip)]
    pub job_status: JobStatus,

    #[garde(skip)]
    #[serde(deserialize_with = "deserialize_flag")]
    pub notify: bool,

    #[garde(skip)]
    #[serde(deserialize_with = "deserialize_flag")]
    pub first_check: bool,

    #[garde(length(min = 1, max = 50), dive)]
    pub data: Vec<SubmissionItem>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SubmissionItem {
    #[garde(length(min = 1, max = 64))]
    pub account: String,

    #[garde(skip)]
    pub account_type: AccountType,

    #[garde(length(max = 100))]
    #[serde(default)]
    pub city: Option<String>,

    #[garde(skip)]
    pub utility: Utility,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Job status must be \"new\", got \"{0}\"")]
    InvalidStatus(JobStatus),

    #[error("Duplicate account in submission: {0}")]
    DuplicateAccount(String),

    #[error("Invalid submission: {0}")]
    Invalid(#[from] garde::Report),
}

impl JobSubmission {
    /// Reject anything that must not reach the store or the queue.
    pub fn check(&self) -> Result<(), SubmissionError> {
        if self.job_status != JobStatus::New {
            return Err(SubmissionError::InvalidStatus(self.job_status));
        }
        self.validate()?;
        self.check_duplicates()
    }

    pub fn check_duplicates(&self) -> Result<(), SubmissionError> {
        let mut seen = HashSet::with_capacity(self.data.len());
        for item in &self.data {
            if !seen.insert(item.account.as_str()) {
                return Err(SubmissionError::DuplicateAccount(item.account.clone()));
            }
        }
        Ok(())
    }

    /// Build the stored document. The job starts out as `Processing`.
    pub fn into_job(self, job_id: String) -> Job {
        Job {
            job_id,
            owner_id: self.owner_id,
            job_status: JobStatus::Processing,
            notify: self.notify,
            first_check: self.first_check,
            data: self
                .data
                .into_iter()
                .map(|item| SubTask {
                    account: item.account,
                    account_type: item.account_type,
                    city: item.city,
                    utility: item.utility,
                    status_response: None,
                    response: None,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }
}

/// Response after accepting a submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub task_status: JobStatus,
}

/// Response while a job is pending, or when it failed / is unknown.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
