//! Analytics service: records every event on the exchange.

use std::sync::Arc;

use async_trait::async_trait;
use events::EventEnvelope;
use resilience::IdempotencyLedger;

use crate::analytics::AnalyticsStore;
use crate::consumer::MessageHandler;
use crate::error::Result;
use crate::order_fulfillment::Service;

/// Consumes every routing key. Idempotent per `<routing_key>:<order_id>`,
/// so each step of an order is counted once.
pub struct AnalyticsHandler {
    store: Arc<dyn AnalyticsStore>,
    ledger: Arc<dyn IdempotencyLedger>,
}

impl AnalyticsHandler {
    pub fn new(store: Arc<dyn AnalyticsStore>, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        Self { store, ledger }
    }

    pub fn store(&self) -> &Arc<dyn AnalyticsStore> {
        &self.store
    }
}

#[async_trait]
impl MessageHandler for AnalyticsHandler {
    fn service(&self) -> &'static str {
        Service::Analytics.name()
    }

    #[tracing::instrument(skip(self, envelope), fields(order_id = %envelope.order_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let key = format!("{}:{}", envelope.routing_key(), envelope.order_id);
        if super::is_duplicate(self.ledger.as_ref(), self.service(), &key, envelope).await? {
            return Ok(());
        }

        self.store.record(envelope).await?;
        self.ledger.mark_processed(self.service(), &key).await?;

        metrics::counter!("analytics_events_total", "event_type" => envelope.event_type())
            .increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{CorrelationId, OrderId, Sku};
    use events::{OrderCreated, OrderEvent, PaymentStatus};
    use resilience::InMemoryLedger;

    use super::*;
    use crate::analytics::InMemoryAnalyticsStore;

    fn created(id: i64) -> EventEnvelope {
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
    }

    #[tokio::test]
    async fn test_counts_each_step_once() {
        let store = InMemoryAnalyticsStore::new();
        let handler = AnalyticsHandler::new(Arc::new(store.clone()), Arc::new(InMemoryLedger::new()));

        let order = created(2);
        let validated = order.derive(OrderEvent::inventory_validated(), Utc::now());
        let confirmed = validated.derive(OrderEvent::payment(PaymentStatus::Paid), Utc::now());

        for event in [&order, &validated, &confirmed, &validated] {
            handler.handle(event).await.unwrap();
        }

        let counters = store.counters().await.unwrap();
        assert_eq!(counters.total_events, 3);
        assert_eq!(counters.orders_created, 1);
        assert_eq!(counters.inventory_validated, 1);
        assert_eq!(counters.payments_successful, 1);
        assert_eq!(counters.orders_completed, 1);

        let trace = store.trace(OrderId::new(2)).await.unwrap();
        let types: Vec<_> = trace.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["OrderCreated", "InventoryResult", "PaymentResult"]);
    }

    #[tokio::test]
    async fn test_summary() {
        let store = InMemoryAnalyticsStore::new();
        for id in 1..=3 {
            store.record(&created(id)).await.unwrap();
        }
        for event in [
            created(1).derive(OrderEvent::payment(PaymentStatus::Paid), Utc::now()),
            created(2).derive(OrderEvent::payment(PaymentStatus::Failed), Utc::now()),
            created(3).derive(OrderEvent::inventory_rejected("insufficient stock"), Utc::now()),
        ] {
            store.record(&event).await.unwrap();
        }

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_orders, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.success_rate, 33.33);
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let summary = InMemoryAnalyticsStore::new().summary().await.unwrap();
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.total_orders, 0);
    }
}
