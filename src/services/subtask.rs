use std::sync::Arc;

use async_trait::async_trait;

use crate::models::job::{ErrorRecord, JobStatus, SubTaskPayload, SubTaskResult};
use crate::scraper::runner::ScrapeRunner;
use crate::services::completion::{CompletionAggregator, PollOutcome};
use crate::services::job_store::JobStoreError;
use crate::services::worker_pool::{HandlerError, TaskHandler};

/// Worker-side handler: scrape one account and merge the outcome into its
/// job.
pub struct SubTaskHandler {
    runner: Arc<ScrapeRunner>,
    aggregator: Arc<CompletionAggregator>,
}

impl SubTaskHandler {
    pub fn new(runner: Arc<ScrapeRunner>, aggregator: Arc<CompletionAggregator>) -> Self {
        Self { runner, aggregator }
    }
}

#[async_trait]
impl TaskHandler for SubTaskHandler {
    async fn handle(&self, task_id: &str, payload: SubTaskPayload) -> Result<(), HandlerError> {
        let job_id = payload.job_id.as_str();

        match self.aggregator.poll(job_id).await {
            Ok(PollOutcome::NotFound) => {
                tracing::warn!(task_id, job_id, "Job expired before its sub-task ran, skipping");
                return Ok(());
            }
            Ok(PollOutcome::Complete(job)) if job.job_status == JobStatus::Error => {
                tracing::warn!(task_id, job_id, "Job already failed, skipping sub-task");
                return Ok(());
            }
            _ => {}
        }

        tracing::info!(
            task_id,
            job_id,
            account = %payload.account,
            utility = %payload.utility,
            first_check = payload.first_check,
            "Processing sub-task"
        );

        let outcome = match self.runner.run(&payload).await {
            Ok(fields) => SubTaskResult::Fields(fields),
            Err(e) => SubTaskResult::Error(ErrorRecord::new(e.kind(), &e.to_string())),
        };

        match self
            .aggregator
            .record_outcome(job_id, &payload.account, outcome)
            .await
        {
            Ok(_) => Ok(()),
            Err(JobStoreError::NotFound(_)) => {
                tracing::warn!(task_id, job_id, "Job expired while its sub-task ran, result dropped");
                Ok(())
            }
            Err(e @ JobStoreError::SubTaskNotFound { .. }) => {
                // The payload does not belong to this job: a job-level fault.
                self.aggregator.fail_job(job_id).await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
