pub mod completion;
pub mod job_store;
pub mod proxy_pool;
pub mod queue;
pub mod retry;
pub mod store;
pub mod subtask;
pub mod worker_pool;
