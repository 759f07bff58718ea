use std::sync::Arc;
use std::time::Duration;

use crate::services::{
    completion::CompletionAggregator, job_store::JobStore, queue::QueueBroker, store::Store,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobStore>,
    pub broker: Arc<QueueBroker>,
    pub aggregator: Arc<CompletionAggregator>,
    pub api_token: Arc<str>,
    /// Priority-ordered queue names. Submissions go to the first.
    pub queues: Arc<[String]>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, job_ttl: Duration, api_token: &str, queues: Vec<String>) -> Self {
        let jobs = Arc::new(JobStore::new(store.clone(), job_ttl));
        Self {
            aggregator: Arc::new(CompletionAggregator::new(jobs.clone())),
            jobs,
            broker: Arc::new(QueueBroker::new(store)),
            api_token: Arc::from(api_token),
            queues: queues.into(),
        }
    }

    pub fn submit_queue(&self) -> &str {
        self.queues.first().map(String::as_str).unwrap_or("parser:high")
    }
}
