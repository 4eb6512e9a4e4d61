//! Payment service: charges validated orders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use events::{EventEnvelope, InventoryStatus, OrderEvent, PaymentStatus};
use resilience::IdempotencyLedger;

use crate::consumer::MessageHandler;
use crate::error::{HandlerError, Result};
use crate::order_fulfillment::Service;
use crate::publisher::EventPublisher;

/// Charges an order.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, order_id: OrderId) -> Result<PaymentStatus>;
}

/// Simulated gateway: even order ids are paid, odd ones fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParityPaymentGateway;

#[async_trait]
impl PaymentGateway for ParityPaymentGateway {
    async fn charge(&self, order_id: OrderId) -> Result<PaymentStatus> {
        Ok(if order_id.is_even() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        })
    }
}

/// Consumes `order.validated`, charges the order and answers with
/// `order.confirmed` or `order.rejected`. Idempotent per `order_id`.
pub struct PaymentHandler {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn IdempotencyLedger>,
    publisher: EventPublisher,
}

impl PaymentHandler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<dyn IdempotencyLedger>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            gateway,
            ledger,
            publisher,
        }
    }
}

#[async_trait]
impl MessageHandler for PaymentHandler {
    fn service(&self) -> &'static str {
        Service::Payment.name()
    }

    #[tracing::instrument(skip(self, envelope), fields(order_id = %envelope.order_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let OrderEvent::InventoryResult(inventory) = &envelope.event else {
            return Err(HandlerError::Unsupported {
                service: self.service(),
                event_type: envelope.event_type(),
            });
        };
        if inventory.status == InventoryStatus::Rejected {
            tracing::warn!("ignoring rejected inventory result");
            return Ok(());
        }

        let key = envelope.order_id.to_string();
        if super::is_duplicate(self.ledger.as_ref(), self.service(), &key, envelope).await? {
            return Ok(());
        }

        let status = self.gateway.charge(envelope.order_id).await?;
        let answer = envelope.derive(OrderEvent::payment(status), Utc::now());
        self.publisher.publish(&answer).await?;
        self.ledger.mark_processed(self.service(), &key).await?;

        tracing::info!(status = %answer.status(), "payment processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use broker::{BrokerConnector, InMemoryBroker, Topology, declare_topology};
    use common::{CorrelationId, Sku};
    use events::{EXCHANGE, OrderCreated, RoutingKey};
    use resilience::{CircuitBreaker, CircuitBreakerConfig, InMemoryLedger};

    use super::*;

    async fn fixture() -> (InMemoryBroker, PaymentHandler) {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        declare_topology(
            &conn,
            &Topology::for_consumer(EXCHANGE, "results", &["order.confirmed", "order.rejected"]),
        )
        .await
        .unwrap();

        let publisher = EventPublisher::new(
            Arc::new(conn),
            EXCHANGE,
            CircuitBreaker::new("publish", CircuitBreakerConfig::default()),
            Duration::from_secs(5),
        );
        let handler = PaymentHandler::new(
            Arc::new(ParityPaymentGateway),
            Arc::new(InMemoryLedger::new()),
            publisher,
        );
        (broker, handler)
    }

    fn validated(id: i64) -> EventEnvelope {
        EventEnvelope::order_created(
            OrderId::new(id),
            CorrelationId::new(),
            OrderCreated {
                product: Sku::from("SKU-1"),
                quantity: 1,
                customer_name: None,
            },
            Utc::now(),
        )
        .derive(OrderEvent::inventory_validated(), Utc::now())
    }

    async fn routing_keys(broker: &InMemoryBroker) -> Vec<String> {
        broker
            .messages("results")
            .await
            .into_iter()
            .map(|m| m.routing_key)
            .collect()
    }

    #[tokio::test]
    async fn test_parity_gateway() {
        let gateway = ParityPaymentGateway;
        assert_eq!(gateway.charge(OrderId::new(2)).await.unwrap(), PaymentStatus::Paid);
        assert_eq!(gateway.charge(OrderId::new(3)).await.unwrap(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_even_order_is_confirmed() {
        let (broker, handler) = fixture().await;
        handler.handle(&validated(2)).await.unwrap();
        assert_eq!(routing_keys(&broker).await, vec![RoutingKey::OrderConfirmed.as_str()]);
    }

    #[tokio::test]
    async fn test_odd_order_is_rejected() {
        let (broker, handler) = fixture().await;
        handler.handle(&validated(3)).await.unwrap();
        assert_eq!(routing_keys(&broker).await, vec![RoutingKey::OrderRejected.as_str()]);
    }

    #[tokio::test]
    async fn test_duplicate_is_charged_once() {
        let (broker, handler) = fixture().await;
        let event = validated(4);

        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(routing_keys(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_marked() {
        let (broker, handler) = fixture().await;
        broker.fail_next_publishes(1).await;
        let event = validated(6);

        assert!(handler.handle(&event).await.is_err());
        handler.handle(&event).await.unwrap();

        assert_eq!(routing_keys(&broker).await.len(), 1);
    }
}
