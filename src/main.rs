use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use utility_check::app_state::AppState;
use utility_check::config::AppConfig;
use utility_check::routes;
use utility_check::services::store::RedisStore;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let api_token = config
        .api_token
        .as_deref()
        .expect("API_TOKEN must be set for the API server");
    let queues = config.queues().expect("Invalid queue configuration");

    tracing::info!("Initializing utility-check API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("jobs_submitted_total", "Total jobs accepted by the API");
    metrics::describe_counter!(
        "subtasks_completed_total",
        "Sub-tasks that finished with extracted fields"
    );
    metrics::describe_counter!(
        "subtasks_failed_total",
        "Sub-tasks that finished with an error, by error kind"
    );
    metrics::describe_gauge!("queue_depth", "Pending sub-tasks per queue");

    tracing::info!("Connecting to Redis");
    let store = RedisStore::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis");

    // Create shared application state
    let state = AppState::new(
        Arc::new(store),
        config.job_ttl(),
        api_token,
        queues,
    );

    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting utility-check on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
