pub mod job;
pub mod proxy;
pub mod submission;
