use std::time::Duration;

use async_trait::async_trait;

use crate::models::job::{ExtractedFields, SubTaskPayload};
use crate::scraper::browser::{BrowserError, BrowserSession};

/// How long an extractor waits for page elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractTimeouts {
    /// Probe for the "account not found" alert.
    pub not_found_probe: Duration,
    /// Wait for the results panel to appear.
    pub results: Duration,
}

/// Inputs for one extraction on an already loaded page.
pub struct ExtractContext<'a> {
    pub session: &'a dyn BrowserSession,
    pub url: &'a str,
    pub task: &'a SubTaskPayload,
    pub timeouts: ExtractTimeouts,
}

/// Site-specific form filling and result parsing.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, ctx: &ExtractContext<'_>) -> Result<ExtractedFields, ExtractError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The portal says the account does not exist. Never retried.
    #[error("Account {0} not found")]
    AccountNotFound(String),

    /// The page did not render what the extractor expects.
    #[error("Selector not found: {0}")]
    SelectorNotFound(String),

    #[error("Utility {0} is not served by this site")]
    UnsupportedUtility(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}
