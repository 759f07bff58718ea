//! Utility account check engine
//!
//! Accepts batches of utility account checks over HTTP, fans them out as
//! sub-tasks on Redis-backed queues, and runs them in worker processes that
//! scrape billing portals through a headless browser and a rotating proxy
//! pool. Results are merged back into a Redis job document that callers poll.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod scraper;
pub mod services;
