//! Circuit-broken event publisher.

use std::sync::Arc;
use std::time::Duration;

use broker::{Broker, OutboundMessage};
use events::EventEnvelope;
use resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};

use crate::error::PublishError;

/// Publishes envelopes to the orders exchange as persistent JSON messages.
///
/// Every publish runs through a circuit breaker and is bounded by a timeout,
/// so a broker that stops accepting messages makes publishes fail fast
/// instead of piling up behind it.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl EventPublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        exchange: impl Into<String>,
        breaker: CircuitBreaker,
        timeout: Duration,
    ) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            breaker,
            timeout,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Publishes `envelope` under the routing key its event implies.
    #[tracing::instrument(skip(self, envelope), fields(
        order_id = %envelope.order_id,
        routing_key = %envelope.routing_key(),
    ))]
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let routing_key = envelope.routing_key();
        let body = events::serialize(envelope)?;
        let message = OutboundMessage::persistent_json(routing_key.as_str(), body);

        let result = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(
                    self.timeout,
                    self.broker.publish(&self.exchange, message),
                )
                .await
                {
                    Ok(published) => published.map_err(PublishError::Broker),
                    Err(_) => Err(PublishError::Timeout(self.timeout)),
                }
            })
            .await;

        match result {
            Ok(()) => {
                metrics::counter!("events_published_total", "routing_key" => routing_key.as_str())
                    .increment(1);
                tracing::debug!("event published");
                Ok(())
            }
            Err(CircuitBreakerError::Open) => Err(PublishError::CircuitOpen),
            Err(CircuitBreakerError::Inner(e)) => {
                tracing::warn!(error = %e, "publish failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use broker::{BrokerConnector, InMemoryBroker, Topology, declare_topology};
    use chrono::Utc;
    use common::{CorrelationId, OrderId, Sku};
    use events::{EXCHANGE, OrderCreated};
    use resilience::CircuitBreakerConfig;

    use super::*;

    async fn setup(threshold: u32) -> (InMemoryBroker, EventPublisher) {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        declare_topology(
            &conn,
            &Topology::for_consumer(EXCHANGE, "inventory.queue", &["order.created"]),
        )
        .await
        .unwrap();

        let breaker = CircuitBreaker::new(
            "publish",
            CircuitBreakerConfig::builder()
                .failure_threshold(threshold)
                .recovery_timeout(Duration::from_secs(30))
                .build(),
        );
        let publisher = EventPublisher::new(Arc::new(conn), EXCHANGE, breaker, Duration::from_secs(5));
        (broker, publisher)
    }

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
    async fn test_publish_routes_by_event() {
        let (broker, publisher) = setup(3).await;
        let envelope = created(1);

        publisher.publish(&envelope).await.unwrap();

        let queued = broker.messages("inventory.queue").await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].routing_key, "order.created");
        assert!(queued[0].properties.persistent);
        assert_eq!(events::parse(&queued[0].body).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_failures_open_the_circuit() {
        let (broker, publisher) = setup(2).await;
        broker.set_publish_unavailable(true).await;

        for _ in 0..2 {
            let err = publisher.publish(&created(1)).await.unwrap_err();
            assert!(matches!(err, PublishError::Broker(_)));
        }
        assert_eq!(publisher.circuit_state(), CircuitState::Open);

        broker.set_publish_unavailable(false).await;
        let err = publisher.publish(&created(2)).await.unwrap_err();
        assert!(matches!(err, PublishError::CircuitOpen));
        assert_eq!(broker.queue_depth("inventory.queue").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_recovers_after_timeout() {
        let (broker, publisher) = setup(1).await;
        broker.fail_next_publishes(1).await;

        assert!(publisher.publish(&created(1)).await.is_err());
        assert_eq!(publisher.circuit_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        publisher.publish(&created(2)).await.unwrap();
        assert_eq!(publisher.circuit_state(), CircuitState::Closed);
        assert_eq!(broker.queue_depth("inventory.queue").await, 1);
    }
}
