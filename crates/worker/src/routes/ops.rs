//! Operational endpoints: liveness with circuit and consumer state, and Prometheus scrape.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::CircuitState;
use saga::ConsumerStatus;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub circuit: &'static str,
    /// Keyed by queue name.
    pub consumers: BTreeMap<String, ConsumerStatus>,
}

/// GET /health: `degraded` while the publish circuit is not closed or any
/// consumer is failing or stopped.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let circuit = state.producer.publisher().circuit_state();
    let consumers = state.consumers.snapshot().await;
    let consumers_ok = consumers.values().all(ConsumerStatus::is_running);

    let status = match circuit {
        CircuitState::Closed if consumers_ok => "ok",
        _ => "degraded",
    };

    Json(HealthResponse {
        status,
        circuit: circuit.as_str(),
        consumers,
    })
}

/// GET /metrics
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    let content_type = [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")];
    (StatusCode::OK, content_type, handle.render())
}
