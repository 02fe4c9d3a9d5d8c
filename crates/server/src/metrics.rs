//! Prometheus metrics endpoint

use axum::extract::State;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
