use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use utility_check::config::AppConfig;
use utility_check::scraper::chrome::ChromeSessionFactory;
use utility_check::scraper::fingerprint::FingerprintGenerator;
use utility_check::scraper::runner::ScrapeRunner;
use utility_check::scraper::sites::default_registry;
use utility_check::services::{
    completion::CompletionAggregator,
    job_store::JobStore,
    proxy_pool::{ProxyPool, WebshareClient},
    queue::QueueBroker,
    store::{RedisStore, Store},
    subtask::SubTaskHandler,
    worker_pool::WorkerPool,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting utility-check worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let queues = config.queues().expect("Invalid queue configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("WORKER_METRICS_ADDR must be host:port");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    metrics::describe_counter!("subtasks_completed_total", "Sub-tasks that finished with extracted fields");
    metrics::describe_counter!("subtasks_failed_total", "Sub-tasks that finished with an error, by error kind");
    metrics::describe_counter!("proxy_refills_total", "Proxy list refills from the upstream API");
    metrics::describe_counter!("proxy_failures_reported_total", "Failures recorded against proxies");
    metrics::describe_counter!("redis_blocking_connects_total", "Connections opened for blocking queue pops");
    metrics::describe_histogram!("scrape_duration_seconds", "Time spent scraping one sub-task");

    tracing::info!("Connecting to Redis");
    let store: Arc<dyn Store> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .expect("Failed to connect to Redis"),
    );

    // Initialize services
    tracing::info!("Initializing services");
    let webshare_token = config
        .webshare_token
        .as_deref()
        .expect("WEBSHARE_TOKEN must be set for workers");
    let proxy_source = WebshareClient::new(&config.webshare_url, webshare_token)
        .expect("Failed to initialize Webshare client");
    let proxies = ProxyPool::new(store.clone(), Arc::new(proxy_source), config.proxy_pool_config());

    let fingerprints = match &config.user_agents_path {
        Some(path) => FingerprintGenerator::from_file(path).expect("Failed to load user agents"),
        None => FingerprintGenerator::default(),
    };

    let runner = ScrapeRunner::new(
        Arc::new(proxies),
        Arc::new(ChromeSessionFactory::new(config.chrome_config())),
        Arc::new(fingerprints),
        config.site_directory(),
        default_registry(),
        config.scrape_settings(),
    );

    let jobs = Arc::new(JobStore::new(store.clone(), config.job_ttl()));
    let aggregator = Arc::new(CompletionAggregator::new(jobs));
    let handler = SubTaskHandler::new(Arc::new(runner), aggregator);
    let broker = Arc::new(QueueBroker::new(store));

    let pool = WorkerPool::new(queues, broker, Arc::new(handler));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested, finishing current task");
        signal.cancel();
    });

    tracing::info!("Worker ready, starting task processing loop");
    pool.run(shutdown).await;
}
