//! Order fulfillment worker.
//!
//! Runs the choreography consumers enabled by `SERVICES` on one broker
//! connection, and serves the order intake and ops endpoints over HTTP,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{AnalyticsStore, ConsumerHealth, OrderProducer, OrderStatusStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::{ApiError, ConfigError, StartupError};
pub use runtime::{Runtime, Stores};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub producer: OrderProducer,
    pub orders: Arc<dyn OrderStatusStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub consumers: ConsumerHealth,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/orders", post(routes::orders::create))
        .route("/orders", get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/analytics", get(routes::analytics::summary))
        .route("/analytics/events", get(routes::analytics::events))
        .route("/analytics/orders/{id}", get(routes::analytics::trace))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
