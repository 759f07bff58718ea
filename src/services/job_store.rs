use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{Job, JobStatus, ResponseStatus, SubTaskResult};
use crate::services::store::{Store, StoreError};

const KEY_PREFIX: &str = "job:";

/// How many times a read-modify-write is retried when another writer got in
/// first.
const MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Sub-task field that can be patched in place.
#[derive(Debug, Clone, PartialEq)]
pub enum SubTaskField {
    Response(SubTaskResult),
    City(Option<String>),
}

/// Job documents in Redis, one JSON value per job, TTL-bounded.
///
/// All mutations go through [`JobStore::update`], a compare-and-swap loop, so
/// two sub-tasks of one job finishing at the same time cannot overwrite each
/// other's result.
pub struct JobStore {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(job_id: &str) -> String {
        format!("{KEY_PREFIX}{job_id}")
    }

    /// Store a job, overwriting any previous document with the same id.
    pub async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let payload = serde_json::to_string(job)?;
        self.store
            .set_ex(&Self::key(&job.job_id), &payload, self.ttl)
            .await?;
        tracing::debug!(job_id = %job.job_id, subtasks = job.data.len(), "Job stored");
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, JobStoreError> {
        self.get_raw(job_id).await.map(|(_, job)| job)
    }

    async fn get_raw(&self, job_id: &str) -> Result<(String, Job), JobStoreError> {
        let raw = self
            .store
            .get(&Self::key(job_id))
            .await?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let job = serde_json::from_str(&raw)?;
        Ok((raw, job))
    }

    /// Read the job, apply `f`, and write it back with a fresh TTL. Retries
    /// from the read if the document changed underneath.
    pub async fn update<F, R>(&self, job_id: &str, mut f: F) -> Result<R, JobStoreError>
    where
        F: FnMut(&mut Job) -> Result<R, JobStoreError>,
    {
        let key = Self::key(job_id);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let (raw, mut job) = self.get_raw(job_id).await?;
            let out = f(&mut job)?;
            let updated = serde_json::to_string(&job)?;

            if self
                .store
                .compare_and_swap(&key, &raw, &updated, self.ttl)
                .await?
            {
                return Ok(out);
            }
            tracing::debug!(job_id, attempt, "Concurrent job update, retrying");
        }
        Err(JobStoreError::Conflict(job_id.to_string()))
    }

    /// Set one field of the sub-task whose account matches `account`, and
    /// optionally its status.
    pub async fn patch_subtask(
        &self,
        job_id: &str,
        account: &str,
        field: SubTaskField,
        status_response: Option<ResponseStatus>,
    ) -> Result<(), JobStoreError> {
        self.update(job_id, |job| apply_patch(job, account, field.clone(), status_response))
            .await
    }

    pub async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), JobStoreError> {
        self.update(job_id, |job| {
            job.job_status = status;
            Ok(())
        })
        .await
    }
}

/// Apply a sub-task patch to an in-memory job.
pub fn apply_patch(
    job: &mut Job,
    account: &str,
    field: SubTaskField,
    status_response: Option<ResponseStatus>,
) -> Result<(), JobStoreError> {
    let job_id = job.job_id.clone();
    let subtask = job
        .subtask_mut(account)
        .ok_or_else(|| JobStoreError::SubTaskNotFound {
            job_id,
            account: account.to_string(),
        })?;

    match field {
        SubTaskField::Response(result) => subtask.response = Some(result),
        SubTaskField::City(city) => subtask.city = city,
    }
    if let Some(status) = status_response {
        subtask.status_response = Some(status);
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job {0} not found or expired")]
    NotFound(String),

    #[error("Job {job_id} has no sub-task for account {account}")]
    SubTaskNotFound { job_id: String, account: String },

    #[error("Job {0} kept changing while updating it")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{AccountType, ErrorKind, ErrorRecord, ExtractedFields, SubTask, Utility};
    use crate::services::store::MemoryStore;
    use chrono::Utc;

    fn job(id: &str, accounts: &[&str]) -> Job {
        Job {
            job_id: id.to_string(),
            owner_id: "u1".to_string(),
            job_status: JobStatus::Processing,
            notify: false,
            first_check: false,
            data: accounts
                .iter()
                .map(|a| SubTask {
                    account: a.to_string(),
                    account_type: AccountType::Code,
                    city: None,
                    utility: Utility::Water,
                    status_response: None,
                    response: None,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    fn job_store() -> (Arc<MemoryStore>, JobStore) {
        let memory = Arc::new(MemoryStore::new());
        let store = JobStore::new(memory.clone(), Duration::from_secs(3600));
        (memory, store)
    }

    #[tokio::test]
    async fn test_create_is_idempotent_overwrite() {
        let (_, store) = job_store();
        store.create(&job("j1", &["1"])).await.unwrap();
        store.create(&job("j1", &["1", "2"])).await.unwrap();

        let stored = store.get("j1").await.unwrap();
        assert_eq!(stored.data.len(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_and_expired() {
        let (memory, store) = job_store();
        assert!(matches!(store.get("nope").await, Err(JobStoreError::NotFound(_))));

        store.create(&job("j1", &["1"])).await.unwrap();
        memory.expire("job:j1");
        assert!(matches!(store.get("j1").await, Err(JobStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_patch_subtask_sets_field_and_status() {
        let (_, store) = job_store();
        store.create(&job("j1", &["1", "2"])).await.unwrap();

        let fields = ExtractedFields {
            address: Some("Yerevan".to_string()),
            ..Default::default()
        };
        store
            .patch_subtask(
                "j1",
                "2",
                SubTaskField::Response(SubTaskResult::Fields(fields.clone())),
                Some(ResponseStatus::Complete),
            )
            .await
            .unwrap();

        let stored = store.get("j1").await.unwrap();
        assert_eq!(stored.data[0].status_response, None);
        assert_eq!(stored.data[1].status_response, Some(ResponseStatus::Complete));
        assert_eq!(stored.data[1].response, Some(SubTaskResult::Fields(fields)));
    }

    #[tokio::test]
    async fn test_patch_without_status_keeps_outstanding() {
        let (_, store) = job_store();
        store.create(&job("j1", &["1"])).await.unwrap();
        store
            .patch_subtask("j1", "1", SubTaskField::City(Some("Gyumri".into())), None)
            .await
            .unwrap();

        let stored = store.get("j1").await.unwrap();
        assert_eq!(stored.data[0].city.as_deref(), Some("Gyumri"));
        assert!(!stored.is_complete());
    }

    #[tokio::test]
    async fn test_patch_unknown_account() {
        let (_, store) = job_store();
        store.create(&job("j1", &["1"])).await.unwrap();

        let err = store
            .patch_subtask(
                "j1",
                "999",
                SubTaskField::Response(SubTaskResult::Error(ErrorRecord {
                    error_kind: ErrorKind::Unknown,
                    message: String::new(),
                })),
                Some(ResponseStatus::Error),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::SubTaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_set_job_status() {
        let (_, store) = job_store();
        store.create(&job("j1", &["1"])).await.unwrap();
        store.set_job_status("j1", JobStatus::Error).await.unwrap();
        assert_eq!(store.get("j1").await.unwrap().job_status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_concurrent_patches_are_not_lost() {
        let (_, store) = job_store();
        let accounts: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = accounts.iter().map(String::as_str).collect();
        store.create(&job("j1", &refs)).await.unwrap();
        let store = Arc::new(store);

        let handles: Vec<_> = accounts
            .iter()
            .cloned()
            .map(|account| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .patch_subtask(
                            "j1",
                            &account,
                            SubTaskField::City(Some(format!("city-{account}"))),
                            Some(ResponseStatus::Complete),
                        )
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        let stored = store.get("j1").await.unwrap();
        assert!(stored.is_complete());
        for sub in &stored.data {
            assert_eq!(sub.city, Some(format!("city-{}", sub.account)));
        }
    }
}
