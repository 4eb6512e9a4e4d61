use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Delivery, OutboundMessage, Redelivery};
use crate::topology::{ExchangeSpec, QueueBinding, QueueSpec};

/// An open connection to a publish/subscribe broker.
///
/// Delivery is at-least-once: a message fetched from a queue stays
/// outstanding until it is acked or nacked, and outstanding messages return
/// to their queue if the connection closes first. Consumers fetch one
/// message at a time and settle it before fetching the next.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares an exchange. Identical re-declaration is a no-op.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()>;

    /// Declares a queue. Identical re-declaration is a no-op.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Binds a queue to an exchange. Re-binding is a no-op.
    async fn bind_queue(&self, binding: &QueueBinding) -> Result<()>;

    /// Publishes a message to an exchange.
    async fn publish(&self, exchange: &str, message: OutboundMessage) -> Result<()>;

    /// Takes the next eligible message from `queue`, waiting up to `wait`.
    ///
    /// Returns `None` if nothing became eligible in time.
    async fn fetch(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>>;

    /// Acknowledges a delivery, removing the message permanently.
    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledges a delivery.
    ///
    /// With `Some(redelivery)` the message returns to the queue carrying the
    /// new retry count and becomes eligible after the delay. With `None` it
    /// is routed through the queue's dead-letter exchange.
    async fn nack(&self, queue: &str, delivery_tag: u64, requeue: Option<Redelivery>)
    -> Result<()>;

    /// Closes the connection. Outstanding deliveries are returned to their queues.
    async fn close(&self) -> Result<()>;
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Connection: Broker;

    /// Makes a single connection attempt.
    async fn connect(&self) -> Result<Self::Connection>;
}
