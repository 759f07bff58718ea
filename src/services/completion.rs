use std::sync::Arc;

use crate::models::job::{Job, JobStatus, ResponseStatus, SubTaskResult};
use crate::services::job_store::{apply_patch, JobStore, JobStoreError, SubTaskField};

/// What a poller sees for a job id.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Processing,
    Complete(Job),
    NotFound,
}

/// Merges sub-task outcomes into their job and decides when the job is done.
pub struct CompletionAggregator {
    jobs: Arc<JobStore>,
}

impl CompletionAggregator {
    pub fn new(jobs: Arc<JobStore>) -> Self {
        Self { jobs }
    }

    /// Write one sub-task's outcome and, in the same atomic update, flip the
    /// job to `complete` if nothing is left outstanding. Returns true when
    /// this call completed the job.
    pub async fn record_outcome(
        &self,
        job_id: &str,
        account: &str,
        outcome: SubTaskResult,
    ) -> Result<bool, JobStoreError> {
        let status = match &outcome {
            SubTaskResult::Fields(_) => ResponseStatus::Complete,
            SubTaskResult::Error(_) => ResponseStatus::Error,
        };

        let completed = self
            .jobs
            .update(job_id, |job| {
                apply_patch(job, account, SubTaskField::Response(outcome.clone()), Some(status))?;
                Ok(job.refresh_completion())
            })
            .await?;

        match &outcome {
            SubTaskResult::Fields(_) => metrics::counter!("subtasks_completed_total").increment(1),
            SubTaskResult::Error(record) => metrics::counter!(
                "subtasks_failed_total",
                "error_kind" => record.error_kind.to_string()
            )
            .increment(1),
        }

        if completed {
            tracing::info!(job_id, "Job complete");
        }
        Ok(completed)
    }

    pub async fn is_complete(&self, job_id: &str) -> Result<bool, JobStoreError> {
        Ok(self.jobs.get(job_id).await?.is_complete())
    }

    /// A job marked `error` is final and returned like a completed one.
    pub async fn poll(&self, job_id: &str) -> Result<PollOutcome, JobStoreError> {
        match self.jobs.get(job_id).await {
            Ok(job) if job.is_complete() || job.job_status == JobStatus::Error => {
                Ok(PollOutcome::Complete(job))
            }
            Ok(_) => Ok(PollOutcome::Processing),
            Err(JobStoreError::NotFound(_)) => Ok(PollOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Mark the whole job as failed, for faults that cannot be attributed to
    /// a single sub-task.
    pub async fn fail_job(&self, job_id: &str) -> Result<(), JobStoreError> {
        tracing::warn!(job_id, "Marking job as failed");
        self.jobs.set_job_status(job_id, JobStatus::Error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{AccountType, ErrorKind, ErrorRecord, ExtractedFields, SubTask, Utility};
    use crate::services::store::MemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn job(id: &str, accounts: &[&str]) -> Job {
        Job {
            job_id: id.to_string(),
            owner_id: "u1".to_string(),
            job_status: JobStatus::Processing,
            notify: false,
            first_check: true,
            data: accounts
                .iter()
                .map(|a| SubTask {
                    account: a.to_string(),
                    account_type: AccountType::Code,
                    city: None,
                    utility: Utility::Electricity,
                    status_response: None,
                    response: None,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    async fn aggregator(seed: &Job) -> (Arc<JobStore>, CompletionAggregator) {
        let jobs = Arc::new(JobStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600)));
        jobs.create(seed).await.unwrap();
        (jobs.clone(), CompletionAggregator::new(jobs))
    }

    fn fields(debit: &str) -> SubTaskResult {
        SubTaskResult::Fields(ExtractedFields {
            address: Some("Yerevan".to_string()),
            debit_full: Some(debit.to_string()),
            ..Default::default()
        })
    }

    fn not_found() -> SubTaskResult {
        SubTaskResult::Error(ErrorRecord::new(ErrorKind::AccountNotFound, "account not found"))
    }

    #[tokio::test]
    async fn test_two_subtasks_complete_in_order() {
        let (_, agg) = aggregator(&job("j1", &["1", "2"])).await;

        assert!(!agg.record_outcome("j1", "1", fields("100")).await.unwrap());
        assert!(!agg.is_complete("j1").await.unwrap());
        assert_eq!(agg.poll("j1").await.unwrap(), PollOutcome::Processing);

        assert!(agg.record_outcome("j1", "2", not_found()).await.unwrap());
        match agg.poll("j1").await.unwrap() {
            PollOutcome::Complete(job) => {
                assert_eq!(job.job_status, JobStatus::Complete);
                assert_eq!(job.data[0].status_response, Some(ResponseStatus::Complete));
                assert_eq!(job.data[1].status_response, Some(ResponseStatus::Error));
                assert_eq!(job.data[1].response, Some(not_found()));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failures_never_downgrade_job() {
        let (jobs, agg) = aggregator(&job("j1", &["1"])).await;
        agg.record_outcome("j1", "1", not_found()).await.unwrap();
        assert_eq!(jobs.get("j1").await.unwrap().job_status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_complete_exactly_once() {
        let accounts: Vec<String> = (0..6).map(|i| format!("acc{i}")).collect();
        let refs: Vec<&str> = accounts.iter().map(String::as_str).collect();
        let (jobs, agg) = aggregator(&job("j1", &refs)).await;
        let agg = Arc::new(agg);

        let handles: Vec<_> = accounts
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, account)| {
                let agg = agg.clone();
                tokio::spawn(async move {
                    let outcome = if i % 2 == 0 { fields("0") } else { not_found() };
                    agg.record_outcome("j1", &account, outcome).await
                })
            })
            .collect();

        let mut completions = 0;
        for result in futures::future::join_all(handles).await {
            if result.unwrap().unwrap() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);

        let stored = jobs.get("j1").await.unwrap();
        assert_eq!(stored.job_status, JobStatus::Complete);
        assert_eq!(stored.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_poll_unknown_job() {
        let (_, agg) = aggregator(&job("j1", &["1"])).await;
        assert_eq!(agg.poll("missing").await.unwrap(), PollOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_failed_job_is_final() {
        let (jobs, agg) = aggregator(&job("j1", &["1", "2"])).await;
        agg.fail_job("j1").await.unwrap();

        assert!(matches!(agg.poll("j1").await.unwrap(), PollOutcome::Complete(_)));

        agg.record_outcome("j1", "1", fields("1")).await.unwrap();
        assert!(!agg.record_outcome("j1", "2", fields("2")).await.unwrap());
        assert_eq!(jobs.get("j1").await.unwrap().job_status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_account_is_rejected() {
        let (_, agg) = aggregator(&job("j1", &["1"])).await;
        let err = agg.record_outcome("j1", "nope", fields("0")).await.unwrap_err();
        assert!(matches!(err, JobStoreError::SubTaskNotFound { .. }));
    }
}
