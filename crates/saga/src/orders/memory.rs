use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CorrelationId, OrderId};
use events::OrderStatus;
use tokio::sync::RwLock;

use super::{NewOrder, OrderRecord, OrderStatusStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct OrdersState {
    orders: BTreeMap<OrderId, OrderRecord>,
    next_id: i64,
    unavailable: bool,
}

/// In-memory order store. Ids start at 1.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrdersState>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

fn check(state: &OrdersState) -> Result<(), StoreError> {
    if state.unavailable {
        Err(StoreError::Unavailable("order store offline".to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl OrderStatusStore for InMemoryOrderStore {
    async fn create(
        &self,
        order: &NewOrder,
        correlation_id: CorrelationId,
    ) -> Result<OrderRecord, StoreError> {
        let mut state = self.state.write().await;
        check(&state)?;

        state.next_id += 1;
        let now = Utc::now();
        let record = OrderRecord {
            id: OrderId::new(state.next_id),
            customer_name: order.customer_name.clone(),
            product: order.product.clone(),
            quantity: order.quantity,
            status: OrderStatus::Created,
            correlation_id,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(record.id, record.clone());

        Ok(record)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        check(&state)?;

        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;
        if order.status != status {
            order.status = status;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderRecord>, StoreError> {
        let state = self.state.read().await;
        check(&state)?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let state = self.state.read().await;
        check(&state)?;
        Ok(state.orders.values().cloned().collect())
    }
}
