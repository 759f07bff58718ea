//! Key/value and list storage shared by the job store, the proxy pool and the
//! queue broker.
//!
//! Every component takes an `Arc<dyn Store>`, so production code runs against
//! Redis while tests substitute [`MemoryStore`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Replace the value only if it still matches what the caller read, and
/// refresh the TTL. Returns 1 on swap, 0 on conflict or missing key.
const COMPARE_AND_SWAP_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if current == ARGV[1] then
        redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
        return 1
    end
    return 0
";

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically swap `expected` for `new`. `false` means somebody else wrote
    /// the key in between (or it expired) and the caller should re-read.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Append to the tail of a list.
    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError>;

    /// Pop from the head of the first non-empty list, checking `queues` in
    /// order. Waits up to `timeout` for an item.
    async fn pop_first(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError>;

    async fn queue_len(&self, queue: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Redis-backed store.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    /// BLPOP parks its connection, so pops get one of their own. Opened on
    /// first use, kept across pops and dropped after an error.
    blocking_conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    cas_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            blocking_conn: tokio::sync::Mutex::new(None),
            cas_script: redis::Script::new(COMPARE_AND_SWAP_SCRIPT),
        })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let swapped: i32 = self
            .cas_script
            .key(key)
            .arg(expected)
            .arg(new)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(queue, value).await?;
        Ok(())
    }

    async fn pop_first(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        // Held for the whole BLPOP: one pop at a time per connection.
        let mut slot = self.blocking_conn.lock().await;
        let mut conn = match slot.clone() {
            Some(conn) => conn,
            None => {
                let conn = self.client.get_multiplexed_async_connection().await?;
                metrics::counter!("redis_blocking_connects_total").increment(1);
                tracing::debug!("Opened blocking Redis connection");
                *slot = Some(conn.clone());
                conn
            }
        };

        let popped: redis::RedisResult<Option<(String, String)>> =
            conn.blpop(queues, timeout.as_secs_f64()).await;
        match popped {
            Ok(item) => Ok(item),
            Err(e) => {
                *slot = None;
                Err(e.into())
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(queue).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process store with TTLs and blocking pops, used by tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    pushed: Notify,
}

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, (String, Instant)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryInner {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(self.values.get(key), Some((_, at)) if *at <= Instant::now());
        if expired {
            self.values.remove(key);
        }
        self.values.get(key).map(|(v, _)| v)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop a key, as if its TTL ran out.
    pub fn expire(&self, key: &str) {
        self.lock().values.remove(key);
    }

    /// Snapshot of a list, head first.
    pub fn list(&self, queue: &str) -> Vec<String> {
        self.lock()
            .lists
            .get(queue)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn try_pop(&self, queues: &[String]) -> Option<(String, String)> {
        let mut inner = self.lock();
        for queue in queues {
            if let Some(value) = inner.lists.get_mut(queue).and_then(VecDeque::pop_front) {
                return Some((queue.clone(), value));
            }
        }
        None
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().live_value(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.lock()
            .values
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.live_value(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        inner
            .values
            .insert(key.to_string(), (new.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        self.lock()
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_first(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queues) {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, StoreError> {
        Ok(self.lock().lists.get(queue).map_or(0, |l| l.len() as u64))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
