//! Order producer: stores a new order and starts its saga.

use std::sync::Arc;

use common::CorrelationId;
use events::{EventEnvelope, OrderCreated};

use crate::error::ProducerError;
use crate::orders::{NewOrder, OrderRecord, OrderStatusStore};
use crate::publisher::EventPublisher;

/// Stores submitted orders and publishes `order.created` for each.
///
/// The order row is written first so the event always refers to a stored
/// order. If the publish fails the order stays `CREATED` and the error is
/// returned to the caller.
#[derive(Clone)]
pub struct OrderProducer {
    orders: Arc<dyn OrderStatusStore>,
    publisher: EventPublisher,
}

impl OrderProducer {
    pub fn new(orders: Arc<dyn OrderStatusStore>, publisher: EventPublisher) -> Self {
        Self { orders, publisher }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    #[tracing::instrument(skip(self, order), fields(product = %order.product, quantity = order.quantity))]
    pub async fn submit(&self, order: NewOrder) -> Result<OrderRecord, ProducerError> {
        validate(&order)?;

        let record = self.orders.create(&order, CorrelationId::new()).await?;
        let envelope = EventEnvelope::order_created(
            record.id,
            record.correlation_id,
            OrderCreated {
                product: record.product.clone(),
                quantity: record.quantity,
                customer_name: record.customer_name.clone(),
            },
            record.created_at,
        );

        self.publisher.publish(&envelope).await?;
        metrics::counter!("orders_submitted_total").increment(1);
        tracing::info!(
            order_id = %record.id,
            correlation_id = %record.correlation_id,
            "order submitted"
        );
        Ok(record)
    }
}

fn validate(order: &NewOrder) -> Result<(), ProducerError> {
    if order.quantity == 0 {
        return Err(ProducerError::Invalid(
            "quantity must be greater than zero".to_string(),
        ));
    }
    if order.product.as_str().trim().is_empty() {
        return Err(ProducerError::Invalid("product must not be empty".to_string()));
    }
    Ok(())
}
