//! Scripted browser doubles for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::models::job::ExtractedFields;
use crate::scraper::browser::{BrowserError, BrowserSession, SessionFactory, SessionSpec};
use crate::scraper::extractor::{ExtractContext, ExtractError, Extractor};

/// Session whose page state is fixed up front. Every call is appended to a
/// shared action log.
#[derive(Default)]
pub struct ScriptedSession {
    log: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
    present: HashSet<String>,
    missing: HashSet<String>,
    failing_urls: HashSet<String>,
    html: String,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selectors `wait_for` finds.
    pub fn with_present(mut self, selectors: &[&str]) -> Self {
        self.present.extend(selectors.iter().map(|s| s.to_string()));
        self
    }

    /// Selectors that `click` and `type_into` fail on.
    pub fn with_missing(mut self, selectors: &[&str]) -> Self {
        self.missing.extend(selectors.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, action: String) {
        self.log.lock().unwrap().push(action);
    }

    fn element(&self, selector: &str) -> Result<(), BrowserError> {
        if self.missing.contains(selector) {
            return Err(BrowserError::Element {
                selector: selector.to_string(),
                reason: "not in page".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.record(format!("goto {url}"));
        if self.failing_urls.contains(url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_TIMED_OUT".to_string(),
            });
        }
        Ok(())
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.element(selector)?;
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.element(selector)?;
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        self.record(format!("wait {selector} {}ms", timeout.as_millis()));
        Ok(self.present.contains(selector))
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.html.clone())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`ScriptedSession`]s sharing one action log.
#[derive(Default)]
pub struct ScriptedFactory {
    pub log: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicUsize>,
    /// Proxy id of every session opened, `None` for proxyless.
    pub proxies: Mutex<Vec<Option<String>>>,
    pub failing_urls: HashSet<String>,
    /// The first this-many opens fail.
    pub open_failures: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_urls(mut self, urls: &[&str]) -> Self {
        self.failing_urls.extend(urls.iter().map(|s| s.to_string()));
        self
    }

    pub fn gotos(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|a| a.strip_prefix("goto ").map(str::to_string))
            .collect()
    }

    pub fn opened(&self) -> usize {
        self.proxies.lock().unwrap().len()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self, spec: SessionSpec) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let failing = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrowserError::Launch("chrome exited".to_string()));
        }

        self.proxies
            .lock()
            .unwrap()
            .push(spec.proxy.map(|p| p.id));
        Ok(Box::new(ScriptedSession {
            log: self.log.clone(),
            closed: self.closed.clone(),
            failing_urls: self.failing_urls.clone(),
            ..Default::default()
        }))
    }
}

/// Extractor that replays a fixed sequence of results.
pub struct ScriptedExtractor {
    results: Mutex<VecDeque<Result<ExtractedFields, ExtractError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(results: Vec<Result<ExtractedFields, ExtractError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn extract(&self, _ctx: &ExtractContext<'_>) -> Result<ExtractedFields, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExtractError::SelectorNotFound("script exhausted".to_string())))
    }
}
