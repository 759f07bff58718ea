//! Test helper utilities: in-process app, scripted browser and extractor

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use utility_check::app_state::AppState;
use utility_check::models::job::{ExtractedFields, Utility};
use utility_check::models::proxy::UpstreamProxy;
use utility_check::routes;
use utility_check::scraper::browser::{BrowserError, BrowserSession, SessionFactory, SessionSpec};
use utility_check::scraper::extractor::{ExtractContext, ExtractError, Extractor};
use utility_check::scraper::fingerprint::FingerprintGenerator;
use utility_check::scraper::runner::{ScrapeRunner, ScrapeSettings};
use utility_check::scraper::sites::{ExtractorRegistry, SiteDirectory};
use utility_check::services::completion::CompletionAggregator;
use utility_check::services::proxy_pool::{ProxyApiError, ProxyPool, ProxyPoolConfig, ProxySource};
use utility_check::services::retry::RetryPolicy;
use utility_check::services::store::MemoryStore;
use utility_check::services::subtask::SubTaskHandler;
use utility_check::services::worker_pool::{WorkerPool, WorkerPoolConfig};

use crate::fixtures::PORTAL_URL;

pub const API_TOKEN: &str = "test-token";
pub const QUEUES: [&str; 2] = ["parser:high", "parser:low"];

pub fn queue_names() -> Vec<String> {
    QUEUES.iter().map(|q| q.to_string()).collect()
}

pub fn app_state(store: Arc<MemoryStore>) -> AppState {
    AppState::new(store, Duration::from_secs(3600), API_TOKEN, queue_names())
}

/// Serve the API on an ephemeral port. Returns the base URL.
pub async fn spawn_app(state: AppState) -> String {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let app = routes::router(state, Arc::new(handle));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server error");
    });

    format!("http://{}", addr)
}

/// Upstream that never has proxies, so scrapes run proxyless.
pub struct NoProxies;

#[async_trait]
impl ProxySource for NoProxies {
    async fn fetch(&self) -> Result<Vec<UpstreamProxy>, ProxyApiError> {
        Ok(Vec::new())
    }
}

/// Session that loads any URL and has no elements.
pub struct BlankSession;

#[async_trait]
impl BrowserSession for BlankSession {
    async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn type_into(&self, _selector: &str, _text: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<bool, BrowserError> {
        Ok(false)
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(String::new())
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct BlankFactory {
    pub opened: AtomicUsize,
}

#[async_trait]
impl SessionFactory for BlankFactory {
    async fn open(&self, _spec: SessionSpec) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BlankSession))
    }
}

/// Extractor answering per account: fields when known, otherwise the portal's
/// "account not found".
pub struct AccountBook {
    pub accounts: HashMap<String, ExtractedFields>,
    pub calls: AtomicUsize,
}

impl AccountBook {
    pub fn new(accounts: &[(&str, ExtractedFields)]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|(a, f)| (a.to_string(), f.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for AccountBook {
    fn name(&self) -> &'static str {
        "account-book"
    }

    async fn extract(&self, ctx: &ExtractContext<'_>) -> Result<ExtractedFields, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .get(&ctx.task.account)
            .cloned()
            .ok_or_else(|| ExtractError::AccountNotFound(ctx.task.account.clone()))
    }
}

pub struct Worker {
    pub pool: WorkerPool,
    pub factory: Arc<BlankFactory>,
    pub extractor: Arc<AccountBook>,
}

/// Worker pool wired to `store` with scripted browser and extractor.
pub fn worker(store: Arc<MemoryStore>, state: &AppState, extractor: AccountBook) -> Worker {
    let proxies = ProxyPool::new(
        store,
        Arc::new(NoProxies),
        ProxyPoolConfig {
            refill_policy: RetryPolicy::immediate(1),
            ..Default::default()
        },
    );

    let extractor = Arc::new(extractor);
    let mut extractors: ExtractorRegistry = HashMap::new();
    extractors.insert("itf", extractor.clone());

    let sites = SiteDirectory::new()
        .with_urls(Utility::Electricity, PORTAL_URL)
        .with_urls(Utility::Gas, PORTAL_URL);

    let factory = Arc::new(BlankFactory::default());
    let runner = ScrapeRunner::new(
        Arc::new(proxies),
        factory.clone(),
        Arc::new(FingerprintGenerator::default()),
        sites,
        extractors,
        ScrapeSettings::default(),
    );

    let aggregator = Arc::new(CompletionAggregator::new(state.jobs.clone()));
    let handler = SubTaskHandler::new(Arc::new(runner), aggregator);

    let pool = WorkerPool::with_config(
        queue_names(),
        state.broker.clone(),
        Arc::new(handler),
        WorkerPoolConfig {
            pop_timeout: Duration::from_millis(50),
            error_pause: Duration::from_millis(10),
        },
    );

    Worker {
        pool,
        factory,
        extractor,
    }
}
