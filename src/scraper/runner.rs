//! Executes one sub-task as a proxied browser scrape.
//!
//! Three nested budgets apply. The outermost loop re-runs everything while
//! the page renders without the expected selectors. Inside it, each proxy
//! attempt takes a fresh proxy, a fresh fingerprint and a fresh browser
//! session. Inside that, every candidate URL gets a bounded number of
//! navigation tries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strum::Display;
use tracing::{debug, info, warn};

use crate::models::job::{ErrorKind, ExtractedFields, SubTaskPayload, Utility};
use crate::models::proxy::ProxyRecord;
use crate::scraper::browser::{BrowserSession, SessionFactory, SessionSpec};
use crate::scraper::extractor::{ExtractContext, ExtractError, ExtractTimeouts};
use crate::scraper::fingerprint::FingerprintGenerator;
use crate::scraper::sites::{resolve_site, ExtractorRegistry, SiteDirectory};
use crate::services::proxy_pool::ProxyPool;
use crate::services::retry::{retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub proxy_attempts: u32,
    /// Tries per candidate URL.
    pub navigation_retries: u32,
    /// Full proxy-loop runs while the page lacks the expected selectors.
    pub selector_attempts: u32,
    /// Run without a proxy when none can be obtained.
    pub allow_proxyless: bool,
    pub first_check_timeout: Duration,
    pub check_timeout: Duration,
    pub results_timeout: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            proxy_attempts: 5,
            navigation_retries: 3,
            selector_attempts: 3,
            allow_proxyless: true,
            first_check_timeout: Duration::from_millis(3500),
            check_timeout: Duration::from_millis(500),
            results_timeout: Duration::from_millis(5000),
        }
    }
}

impl ScrapeSettings {
    /// A first check of an account gets a longer probe for the "not found"
    /// alert.
    pub fn timeouts(&self, first_check: bool) -> ExtractTimeouts {
        ExtractTimeouts {
            not_found_probe: if first_check {
                self.first_check_timeout
            } else {
                self.check_timeout
            },
            results: self.results_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScrapeState {
    AcquiringProxy,
    BuildingSession,
    Navigating,
    Extracting,
    Succeeded,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Page navigation failed: {0}")]
    PageNavigationFailed(String),

    #[error("Selector not found: {0}")]
    SelectorNotFound(String),

    #[error("Browser session could not be built: {0}")]
    SessionBuildFailed(String),

    #[error("No proxy available: {0}")]
    NoProxyAvailable(String),

    #[error("No site configured for utility {0}")]
    NoSiteForUtility(Utility),

    #[error("No extractor for {0}")]
    NoExtractor(String),

    #[error("Browser fault: {0}")]
    Browser(String),
}

impl ScrapeError {
    /// Classification written back to the job.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            ScrapeError::PageNavigationFailed(_) => ErrorKind::PageNavigationFailed,
            ScrapeError::SelectorNotFound(_) => ErrorKind::SelectorNotFound,
            ScrapeError::SessionBuildFailed(_) => ErrorKind::SessionBuildFailed,
            ScrapeError::NoProxyAvailable(_)
            | ScrapeError::NoSiteForUtility(_)
            | ScrapeError::NoExtractor(_)
            | ScrapeError::Browser(_) => ErrorKind::Unknown,
        }
    }

    /// Errors that end the proxy loop instead of moving to the next proxy.
    fn ends_proxy_loop(&self) -> bool {
        matches!(
            self,
            ScrapeError::AccountNotFound(_)
                | ScrapeError::SelectorNotFound(_)
                | ScrapeError::NoSiteForUtility(_)
                | ScrapeError::NoExtractor(_)
        )
    }

    /// Errors that count against the proxy that was in use.
    fn blames_proxy(&self) -> bool {
        matches!(
            self,
            ScrapeError::PageNavigationFailed(_) | ScrapeError::SelectorNotFound(_) | ScrapeError::Browser(_)
        )
    }
}

impl From<ExtractError> for ScrapeError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::AccountNotFound(account) => ScrapeError::AccountNotFound(account),
            ExtractError::SelectorNotFound(selector) => ScrapeError::SelectorNotFound(selector),
            ExtractError::UnsupportedUtility(utility) => ScrapeError::NoExtractor(utility),
            ExtractError::Browser(e) => ScrapeError::Browser(e.to_string()),
        }
    }
}

pub struct ScrapeRunner {
    proxies: Arc<ProxyPool>,
    sessions: Arc<dyn SessionFactory>,
    fingerprints: Arc<FingerprintGenerator>,
    sites: SiteDirectory,
    extractors: ExtractorRegistry,
    settings: ScrapeSettings,
}

impl ScrapeRunner {
    pub fn new(
        proxies: Arc<ProxyPool>,
        sessions: Arc<dyn SessionFactory>,
        fingerprints: Arc<FingerprintGenerator>,
        sites: SiteDirectory,
        extractors: ExtractorRegistry,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            proxies,
            sessions,
            fingerprints,
            sites,
            extractors,
            settings,
        }
    }

    pub async fn run(&self, task: &SubTaskPayload) -> Result<ExtractedFields, ScrapeError> {
        let started = Instant::now();
        let result = self.run_inner(task).await;
        metrics::histogram!("scrape_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.enter(ScrapeState::Succeeded, task, 0),
            Err(e) => {
                self.enter(ScrapeState::Failed, task, 0);
                warn!(account = %task.account, job_id = %task.job_id, error_kind = %e.kind(), error = %e, "Scrape failed");
            }
        }
        result
    }

    async fn run_inner(&self, task: &SubTaskPayload) -> Result<ExtractedFields, ScrapeError> {
        let urls = self.sites.candidate_urls(task.utility);
        if urls.is_empty() {
            return Err(ScrapeError::NoSiteForUtility(task.utility));
        }

        retry(
            RetryPolicy::immediate(self.settings.selector_attempts),
            |e: &ScrapeError| matches!(e, ScrapeError::SelectorNotFound(_)),
            |round| {
                if round > 1 {
                    info!(account = %task.account, round, "Selectors missing, restarting with fresh proxies");
                }
                self.proxy_loop(task, urls)
            },
        )
        .await
        .map_err(|e| e.into_inner())
    }

    async fn proxy_loop(&self, task: &SubTaskPayload, urls: &[String]) -> Result<ExtractedFields, ScrapeError> {
        let attempts = self.settings.proxy_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.attempt(task, urls, attempt).await {
                Ok(fields) => return Ok(fields),
                Err(e) if e.ends_proxy_loop() => return Err(e),
                Err(e) => {
                    warn!(account = %task.account, attempt, max_attempts = attempts, error = %e, "Proxy attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ScrapeError::NoProxyAvailable("no attempts made".to_string())))
    }

    async fn attempt(
        &self,
        task: &SubTaskPayload,
        urls: &[String],
        attempt: u32,
    ) -> Result<ExtractedFields, ScrapeError> {
        self.enter(ScrapeState::AcquiringProxy, task, attempt);
        let proxy = self.acquire_proxy().await?;
        let proxy_id = proxy.as_ref().map(|p| p.id.clone());
        info!(
            account = %task.account,
            attempt,
            proxy = %proxy.as_ref().map(ProxyRecord::server).unwrap_or_else(|| "none".to_string()),
            "Starting scrape attempt"
        );

        self.enter(ScrapeState::BuildingSession, task, attempt);
        let spec = SessionSpec {
            fingerprint: self.fingerprints.generate(),
            proxy,
        };
        let session = self
            .sessions
            .open(spec)
            .await
            .map_err(|e| ScrapeError::SessionBuildFailed(e.to_string()))?;

        let result = self.drive(session.as_ref(), task, urls, attempt).await;
        session.close().await;

        if let (Err(e), Some(id)) = (&result, &proxy_id) {
            if e.blames_proxy() {
                if let Err(report_err) = self.proxies.report_failure(id).await {
                    warn!(proxy_id = %id, error = %report_err, "Failed to record proxy failure");
                }
            }
        }
        result
    }

    async fn acquire_proxy(&self) -> Result<Option<ProxyRecord>, ScrapeError> {
        match self.proxies.acquire().await {
            Ok(proxy) => Ok(Some(proxy)),
            Err(e) if self.settings.allow_proxyless => {
                warn!(error = %e, "No proxy available, continuing without one");
                Ok(None)
            }
            Err(e) => Err(ScrapeError::NoProxyAvailable(e.to_string())),
        }
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        task: &SubTaskPayload,
        urls: &[String],
        attempt: u32,
    ) -> Result<ExtractedFields, ScrapeError> {
        self.enter(ScrapeState::Navigating, task, attempt);
        let url = self.navigate(session, urls).await?;

        let extractor = resolve_site(url)
            .and_then(|site| self.extractors.get(site))
            .ok_or_else(|| ScrapeError::NoExtractor(url.to_string()))?;

        self.enter(ScrapeState::Extracting, task, attempt);
        let ctx = ExtractContext {
            session,
            url,
            task,
            timeouts: self.settings.timeouts(task.first_check),
        };
        Ok(extractor.extract(&ctx).await?)
    }

    /// First candidate URL that loads.
    async fn navigate<'u>(&self, session: &dyn BrowserSession, urls: &'u [String]) -> Result<&'u str, ScrapeError> {
        for url in urls {
            let loaded = retry(
                RetryPolicy::immediate(self.settings.navigation_retries),
                |_| true,
                |n| {
                    debug!(url = %url, try_number = n, "Navigating");
                    session.goto(url)
                },
            )
            .await;

            match loaded {
                Ok(()) => {
                    info!(url = %url, "Page loaded");
                    return Ok(url);
                }
                Err(e) => warn!(url = %url, tries = e.attempts, error = %e.last, "Could not load page"),
            }
        }
        Err(ScrapeError::PageNavigationFailed(format!(
            "none of {} candidate URLs loaded",
            urls.len()
        )))
    }

    fn enter(&self, state: ScrapeState, task: &SubTaskPayload, attempt: u32) {
        debug!(state = %state, account = %task.account, job_id = %task.job_id, attempt, "Scrape state");
    }
}
