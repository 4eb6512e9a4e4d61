//! Inventory service: reserves stock for new orders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use events::{EventEnvelope, OrderCreated, OrderEvent};
use resilience::IdempotencyLedger;

use crate::consumer::MessageHandler;
use crate::error::{HandlerError, Result};
use crate::order_fulfillment::Service;
use crate::publisher::EventPublisher;
use crate::stock::StockStore;

pub const INVALID_QUANTITY: &str = "invalid quantity";
pub const INSUFFICIENT_STOCK: &str = "insufficient stock";

/// Consumes `order.created`, reserves stock and answers with
/// `order.validated` or `order.rejected`.
///
/// Idempotent per `order_id`. If publishing the answer fails after stock was
/// reserved, the reservation is released before the delivery is retried.
pub struct InventoryHandler {
    stock: Arc<dyn StockStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    publisher: EventPublisher,
}

impl InventoryHandler {
    pub fn new(
        stock: Arc<dyn StockStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            stock,
            ledger,
            publisher,
        }
    }

    async fn reserve(&self, order: &OrderCreated) -> Result<OrderEvent> {
        if order.quantity == 0 {
            return Ok(OrderEvent::inventory_rejected(INVALID_QUANTITY));
        }

        if self.stock.reserve(&order.product, order.quantity).await? {
            metrics::counter!("stock_reservations_total", "outcome" => "reserved").increment(1);
            Ok(OrderEvent::inventory_validated())
        } else {
            metrics::counter!("stock_reservations_total", "outcome" => "insufficient").increment(1);
            Ok(OrderEvent::inventory_rejected(INSUFFICIENT_STOCK))
        }
    }
}

#[async_trait]
impl MessageHandler for InventoryHandler {
    fn service(&self) -> &'static str {
        Service::Inventory.name()
    }

    #[tracing::instrument(skip(self, envelope), fields(order_id = %envelope.order_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let OrderEvent::OrderCreated(order) = &envelope.event else {
            return Err(HandlerError::Unsupported {
                service: self.service(),
                event_type: envelope.event_type(),
            });
        };

        let key = envelope.order_id.to_string();
        if super::is_duplicate(self.ledger.as_ref(), self.service(), &key, envelope).await? {
            return Ok(());
        }

        let result = self.reserve(order).await?;
        let reserved = matches!(result.routing_key(), events::RoutingKey::OrderValidated);
        let answer = envelope.derive(result, Utc::now());

        if let Err(e) = self.publisher.publish(&answer).await {
            if reserved {
                self.stock.release(&order.product, order.quantity).await?;
                tracing::warn!(
                    sku = %order.product,
                    quantity = order.quantity,
                    "reservation released after publish failure"
                );
            }
            return Err(e.into());
        }

        self.ledger.mark_processed(self.service(), &key).await?;
        tracing::info!(
            sku = %order.product,
            quantity = order.quantity,
            status = %answer.status(),
            "inventory checked"
        );
        Ok(())
    }
}
