//! Order records and their saga status.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId, Sku};
use events::OrderStatus;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

/// A new order as submitted by a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub customer_name: Option<String>,
    pub product: Sku,
    pub quantity: u32,
}

/// A stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub customer_name: Option<String>,
    pub product: Sku,
    pub quantity: u32,
    pub status: OrderStatus,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderStatusStore: Send + Sync {
    /// Stores a new order with status `CREATED` and assigns its id.
    async fn create(
        &self,
        order: &NewOrder,
        correlation_id: CorrelationId,
    ) -> Result<OrderRecord, StoreError>;

    /// Sets the status of an existing order. Setting the same status again
    /// is a no-op, which makes status updates naturally idempotent.
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<OrderRecord>, StoreError>;

    /// All orders, oldest first.
    async fn list(&self) -> Result<Vec<OrderRecord>, StoreError>;
}
