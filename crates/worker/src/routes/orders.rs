//! Order intake and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, Sku};
use saga::{NewOrder, OrderRecord};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: Option<String>,
    pub product: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub customer_name: Option<String>,
    pub product: String,
    pub quantity: u32,
    pub status: String,
    pub correlation_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<OrderRecord> for OrderResponse {
    fn from(order: OrderRecord) -> Self {
        Self {
            id: order.id.as_i64(),
            customer_name: order.customer_name,
            product: order.product.to_string(),
            quantity: order.quantity,
            status: order.status.to_string(),
            correlation_id: order.correlation_id.to_string(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: store the order and publish `order.created`.
#[tracing::instrument(skip(state, req), fields(product = %req.product, quantity = req.quantity))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = NewOrder {
        customer_name: req.customer_name,
        product: Sku::from(req.product.trim()),
        quantity: req.quantity,
    };

    let record = state.producer.submit(order).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /orders/{id}: the stored order and its saga status.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .orders
        .get(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order.into()))
}

/// GET /orders: every order, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.list().await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<i64>()
        .map(OrderId::new)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
