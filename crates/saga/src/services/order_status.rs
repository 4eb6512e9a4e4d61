//! Order status service: records the final status of each order.

use std::sync::Arc;

use async_trait::async_trait;
use events::EventEnvelope;

use crate::consumer::MessageHandler;
use crate::error::{Result, StoreError};
use crate::order_fulfillment::Service;
use crate::orders::OrderStatusStore;

/// Consumes `order.confirmed` and `order.rejected` and stores the status the
/// event implies. Writing the same status twice is harmless, so no ledger is
/// needed.
pub struct OrderStatusHandler {
    orders: Arc<dyn OrderStatusStore>,
}

impl OrderStatusHandler {
    pub fn new(orders: Arc<dyn OrderStatusStore>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for OrderStatusHandler {
    fn service(&self) -> &'static str {
        Service::OrderStatus.name()
    }

    #[tracing::instrument(skip(self, envelope), fields(order_id = %envelope.order_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let status = envelope.status();

        match self.orders.update_status(envelope.order_id, status).await {
            Ok(()) => {
                tracing::info!(%status, "order status updated");
                Ok(())
            }
            Err(StoreError::OrderNotFound(id)) => {
                tracing::warn!(order_id = %id, %status, "status update for unknown order ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
