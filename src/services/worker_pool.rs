//! Long-running consumer loop over the sub-task queues.
//!
//! The pool pops one envelope at a time from the priority-ordered queue list,
//! hands it to a [`TaskHandler`] and never lets a handler failure escape the
//! loop. Shutdown is observed between pops only, so an envelope that has left
//! Redis is always handed to the handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::job::{truncate_message, SubTaskPayload};
use crate::services::job_store::JobStoreError;
use crate::services::queue::{QueueBroker, QueueEnvelope};

/// Processes one dequeued sub-task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task_id: &str, payload: SubTaskPayload) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How long one blocking pop waits before the shutdown token is checked
    /// again.
    pub pop_timeout: Duration,
    /// Pause after a handler or broker error.
    pub error_pause: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pop_timeout: Duration::from_secs(1),
            error_pause: Duration::from_secs(1),
        }
    }
}

pub struct WorkerPool {
    queues: Vec<String>,
    broker: Arc<QueueBroker>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(queues: Vec<String>, broker: Arc<QueueBroker>, handler: Arc<dyn TaskHandler>) -> Self {
        Self::with_config(queues, broker, handler, WorkerPoolConfig::default())
    }

    pub fn with_config(
        queues: Vec<String>,
        broker: Arc<QueueBroker>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queues,
            broker,
            handler,
            config,
        }
    }

    /// Consume until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(queues = ?self.queues, "Worker pool started");

        while !shutdown.is_cancelled() {
            match self.broker.pop(&self.queues, self.config.pop_timeout).await {
                Ok(Some((queue, raw))) => self.dispatch(&queue, &raw, &shutdown).await,
                Ok(None) => debug!("No tasks available"),
                Err(e) => {
                    error!(error = %e, "Failed to pop from queue, will retry");
                    self.pause(&shutdown).await;
                }
            }
        }

        info!("Worker pool stopped");
    }

    async fn dispatch(&self, queue: &str, raw: &str, shutdown: &CancellationToken) {
        let envelope = match QueueEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(queue, error = %e, "Dropping malformed queue item");
                return;
            }
        };

        let task_id = envelope.task_id;
        let job_id = envelope.payload.job_id.clone();
        debug!(queue, task_id = %task_id, job_id = %job_id, "Task dequeued");

        if let Err(e) = self.handler.handle(&task_id, envelope.payload).await {
            error!(
                task_id = %task_id,
                job_id = %job_id,
                error = %truncate_message(&e.to_string()),
                "Task handler failed"
            );
            self.pause(shutdown).await;
        }
    }

    async fn pause(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.error_pause) => {}
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("{0}")]
    Failed(String),
}
