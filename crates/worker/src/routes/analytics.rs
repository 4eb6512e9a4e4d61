//! Read-only analytics endpoints over the analytics store.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use saga::{AnalyticsEvent, AnalyticsSummary};
use serde::Deserialize;

use super::orders::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /analytics: counters and success rate.
pub async fn summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    Ok(Json(state.analytics.summary().await?))
}

/// GET /analytics/events?limit=N: most recent events first.
pub async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<AnalyticsEvent>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    Ok(Json(state.analytics.recent(limit).await?))
}

/// GET /analytics/orders/{id}: every event seen for one order.
pub async fn trace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AnalyticsEvent>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.analytics.trace(order_id).await?))
}
