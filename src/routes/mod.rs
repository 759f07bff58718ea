pub mod error;
pub mod health;
pub mod metrics;
pub mod parser;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Submissions are small JSON documents.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Build the API router with all routes and middleware.
pub fn router(state: AppState, prometheus_handle: Arc<PrometheusHandle>) -> Router {
    let metrics_state = metrics::MetricsState {
        handle: prometheus_handle,
        app: state.clone(),
    };

    Router::new()
        .route("/health", get(health::health_check))
        .route("/parser/start_task", post(parser::start_task))
        .route("/parser/result/{task_id}", get(parser::get_result))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
