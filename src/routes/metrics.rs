use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::app_state::AppState;

/// State for the scrape endpoint: the exporter handle plus what is needed
/// to sample queue depth at scrape time.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub app: AppState,
}

/// Set the `queue_depth` gauge for every configured queue. Queues that
/// cannot be read keep their last value.
pub async fn record_queue_depths(state: &AppState) {
    for name in state.queues.iter() {
        match state.broker.depth(name).await {
            Ok(depth) => ::metrics::gauge!("queue_depth", "queue" => name.clone()).set(depth as f64),
            Err(e) => tracing::debug!(queue = %name, error = %e, "Queue depth unavailable"),
        }
    }
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(metrics): State<MetricsState>) -> impl IntoResponse {
    record_queue_depths(&metrics.app).await;
    metrics.handle.render()
}
