use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::models::job::SubTaskPayload;
use crate::services::store::{Store, StoreError};

/// One queued sub-task, serialized as `{"<task_id>": <payload>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEnvelope {
    pub task_id: String,
    pub payload: SubTaskPayload,
}

impl QueueEnvelope {
    pub fn new(task_id: impl Into<String>, payload: SubTaskPayload) -> Self {
        Self {
            task_id: task_id.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        let mut object = Map::with_capacity(1);
        object.insert(self.task_id.clone(), serde_json::to_value(&self.payload)?);
        Ok(Value::Object(object).to_string())
    }

    /// Parse a raw queue item. Anything other than a JSON object with exactly
    /// one key holding a valid payload is malformed.
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| QueueError::MalformedEnvelope(format!("invalid JSON: {e}")))?;

        let Value::Object(object) = value else {
            return Err(QueueError::MalformedEnvelope("not a JSON object".to_string()));
        };
        if object.len() != 1 {
            return Err(QueueError::MalformedEnvelope(format!(
                "expected exactly one key, found {}",
                object.len()
            )));
        }

        let Some((task_id, payload)) = object.into_iter().next() else {
            return Err(QueueError::MalformedEnvelope("empty object".to_string()));
        };
        let payload = serde_json::from_value(payload)
            .map_err(|e| QueueError::MalformedEnvelope(format!("invalid payload: {e}")))?;

        Ok(Self { task_id, payload })
    }
}

/// Redis-list backed task queues. Items are appended at the tail and popped
/// from the head, so each queue is FIFO; when several queues are polled
/// together the earlier one in the list wins.
pub struct QueueBroker {
    store: Arc<dyn Store>,
}

impl QueueBroker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn push(&self, queue: &str, envelope: &QueueEnvelope) -> Result<(), QueueError> {
        let payload = envelope.to_json()?;
        self.store.push(queue, &payload).await?;
        tracing::debug!(queue, task_id = %envelope.task_id, job_id = %envelope.payload.job_id, "Envelope queued");
        Ok(())
    }

    /// Blocking pop across `queues` in priority order. Returns the queue name
    /// and the raw item, or `None` on timeout.
    pub async fn pop(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError> {
        Ok(self.store.pop_first(queues, timeout).await?)
    }

    /// Number of pending items in a queue.
    pub async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.store.queue_len(queue).await?)
    }

    /// Check broker connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        Ok(self.store.ping().await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{AccountType, Utility};
    use crate::services::store::MemoryStore;

    fn payload(account: &str) -> SubTaskPayload {
        SubTaskPayload {
            job_id: "job00001".to_string(),
            account: account.to_string(),
            account_type: AccountType::Code,
            city: None,
            utility: Utility::Electricity,
            first_check: true,
        }
    }

    #[test]
    fn test_envelope_has_single_key() {
        let envelope = QueueEnvelope::new("a1b2c3d4", payload("100"));
        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object["a1b2c3d4"]["account"], "100");
        assert_eq!(object["a1b2c3d4"]["utility"], "electricity");

        let parsed = QueueEnvelope::parse(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "not json",
            "[1, 2]",
            "{}",
            r#"{"a": {}, "b": {}}"#,
            r#"{"a": {"account": "1"}}"#,
        ] {
            assert!(
                matches!(QueueEnvelope::parse(raw), Err(QueueError::MalformedEnvelope(_))),
                "accepted {raw}"
            );
        }
    }

    #[tokio::test]
    async fn test_push_pop_is_fifo() {
        let store = Arc::new(MemoryStore::new());
        let broker = QueueBroker::new(store);
        let queues = vec!["parser:high".to_string()];

        for account in ["1", "2", "3"] {
            broker
                .push("parser:high", &QueueEnvelope::new(account, payload(account)))
                .await
                .unwrap();
        }
        assert_eq!(broker.depth("parser:high").await.unwrap(), 3);

        let mut popped = Vec::new();
        while let Some((queue, raw)) = broker.pop(&queues, Duration::from_millis(10)).await.unwrap() {
            assert_eq!(queue, "parser:high");
            popped.push(QueueEnvelope::parse(&raw).unwrap().task_id);
        }
        assert_eq!(popped, vec!["1", "2", "3"]);
        assert_eq!(broker.depth("parser:high").await.unwrap(), 0);
    }

    #[test]
    fn test_health_check() {
        let broker = QueueBroker::new(Arc::new(MemoryStore::new()));
        tokio_test::assert_ok!(tokio_test::block_on(broker.health_check()));
    }
}
