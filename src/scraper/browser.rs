//! Browser session seam used by the scrape runner and extractors.
//!
//! A session is one isolated browser context with its own proxy and
//! fingerprint. Sessions are never shared between sub-tasks and must be
//! closed by whoever opened them.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::proxy::ProxyRecord;
use crate::scraper::fingerprint::Fingerprint;

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub fingerprint: Fingerprint,
    /// `None` runs without a proxy.
    pub proxy: Option<ProxyRecord>,
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, spec: SessionSpec) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Focus the element and type `text` into it.
    async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Wait until an element matching `selector` exists. `Ok(false)` on
    /// timeout.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError>;

    /// Current page HTML.
    async fn content(&self) -> Result<String, BrowserError>;

    /// Release the session. Never fails; problems are logged.
    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Element {selector} unavailable: {reason}")]
    Element { selector: String, reason: String },

    #[error("Browser call failed: {0}")]
    Protocol(String),

    #[error("Browser task panicked: {0}")]
    Task(String),
}
