//! Declarative broker topology.
//!
//! Declarations are idempotent: declaring identical topology again has no
//! effect, while re-declaring an existing exchange or queue with different
//! properties fails with [`BrokerError::TopologyMismatch`](crate::BrokerError).

use crate::broker::Broker;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routes by wildcard pattern over dot-separated routing keys.
    Topic,
    /// Routes by exact routing-key equality.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable topic exchange.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }

    /// A durable direct exchange.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Exchange rejected messages are republished to (`x-dead-letter-exchange`).
    pub dead_letter_exchange: Option<String>,
    /// Routing key used when dead-lettering (`x-dead-letter-routing-key`).
    pub dead_letter_routing_key: Option<String>,
}

impl QueueSpec {
    /// A durable queue without dead-lettering.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        }
    }

    /// Routes rejected messages to `exchange` with `routing_key`.
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub exchange: String,
    pub queue: String,
    pub routing_key_pattern: String,
}

impl QueueBinding {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key_pattern: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key_pattern: routing_key_pattern.into(),
        }
    }
}

/// Name of the dead-letter queue for `queue`.
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}.dlq")
}

/// Name of the direct exchange feeding the dead-letter queue for `queue`.
pub fn dead_letter_exchange_name(queue: &str) -> String {
    format!("{queue}.dlx")
}

/// A set of exchanges, queues and bindings declared together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<QueueBinding>,
}

impl Topology {
    /// Topology for one consumer queue bound to a topic exchange.
    ///
    /// Besides the durable topic exchange and the queue with its bindings,
    /// this declares the queue's dead-letter path: a direct exchange
    /// `<queue>.dlx` and a queue `<queue>.dlq` bound with routing key
    /// `<queue>.dlq`.
    pub fn for_consumer(exchange: &str, queue: &str, patterns: &[&str]) -> Self {
        let dlx = dead_letter_exchange_name(queue);
        let dlq = dead_letter_queue_name(queue);

        let mut bindings = vec![QueueBinding::new(&dlx, &dlq, &dlq)];
        bindings.extend(
            patterns
                .iter()
                .map(|pattern| QueueBinding::new(exchange, queue, *pattern)),
        );

        Self {
            exchanges: vec![ExchangeSpec::topic(exchange), ExchangeSpec::direct(&dlx)],
            queues: vec![
                QueueSpec::durable(&dlq),
                QueueSpec::durable(queue).with_dead_letter(&dlx, &dlq),
            ],
            bindings,
        }
    }

    /// Topology for a producer that only publishes.
    pub fn for_producer(exchange: &str) -> Self {
        Self {
            exchanges: vec![ExchangeSpec::topic(exchange)],
            ..Self::default()
        }
    }
}

/// Ensures every exchange, queue and binding in `topology` exists.
///
/// Safe to call repeatedly. Fails if an existing exchange or queue has
/// incompatible properties.
#[tracing::instrument(skip(broker, topology), fields(
    exchanges = topology.exchanges.len(),
    queues = topology.queues.len(),
    bindings = topology.bindings.len(),
))]
pub async fn declare_topology<B: Broker + ?Sized>(broker: &B, topology: &Topology) -> Result<()> {
    for exchange in &topology.exchanges {
        broker.declare_exchange(exchange).await?;
    }
    for queue in &topology.queues {
        broker.declare_queue(queue).await?;
    }
    for binding in &topology.bindings {
        broker.bind_queue(binding).await?;
    }

    tracing::info!("topology declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_names() {
        assert_eq!(dead_letter_queue_name("payment.queue"), "payment.queue.dlq");
        assert_eq!(dead_letter_exchange_name("payment.queue"), "payment.queue.dlx");
    }

    #[test]
    fn test_consumer_topology() {
        let topology = Topology::for_consumer(
            "orders.exchange",
            "notification.queue",
            &["order.confirmed", "order.rejected"],
        );

        assert_eq!(
            topology.exchanges,
            vec![
                ExchangeSpec::topic("orders.exchange"),
                ExchangeSpec::direct("notification.queue.dlx"),
            ]
        );

        let main = topology
            .queues
            .iter()
            .find(|q| q.name == "notification.queue")
            .unwrap();
        assert!(main.durable);
        assert_eq!(main.dead_letter_exchange.as_deref(), Some("notification.queue.dlx"));
        assert_eq!(main.dead_letter_routing_key.as_deref(), Some("notification.queue.dlq"));

        assert!(topology.bindings.contains(&QueueBinding::new(
            "notification.queue.dlx",
            "notification.queue.dlq",
            "notification.queue.dlq",
        )));
        assert!(topology.bindings.contains(&QueueBinding::new(
            "orders.exchange",
            "notification.queue",
            "order.rejected",
        )));
        assert_eq!(topology.bindings.len(), 3);
    }

    #[test]
    fn test_everything_is_durable() {
        let topology = Topology::for_consumer("orders.exchange", "q", &["order.created"]);
        assert!(topology.exchanges.iter().all(|e| e.durable));
        assert!(topology.queues.iter().all(|q| q.durable));
    }
}
