//! Broker plumbing for the order fulfillment choreography.
//!
//! Services never call each other; they publish to a durable topic exchange
//! and consume from their own durable queues. This crate provides:
//! - the [`Broker`] and [`BrokerConnector`] traits every service is written against
//! - declarative, idempotent topology ([`Topology`], [`declare_topology`]) including
//!   the per-queue dead-letter exchange and queue
//! - bounded connection retry ([`connect_with_retry`])
//! - [`InMemoryBroker`], a topic-exchange broker with AMQP routing, requeue and
//!   dead-letter semantics
//! - [`AmqpConnector`], the same contract over RabbitMQ

pub mod amqp;
pub mod broker;
pub mod connection;
pub mod error;
pub mod memory;
pub mod message;
pub mod routing;
pub mod topology;

pub use amqp::{AmqpConnection, AmqpConnector};
pub use broker::{Broker, BrokerConnector};
pub use connection::{ConnectionSettings, connect_with_retry};
pub use error::{BrokerError, Result};
pub use memory::{InMemoryBroker, InMemoryConnection, QueuedMessage};
pub use message::{Delivery, Headers, MessageProperties, OutboundMessage, Redelivery, RETRY_COUNT_HEADER};
pub use routing::{topic_matches, validate_pattern};
pub use topology::{
    ExchangeKind, ExchangeSpec, QueueBinding, QueueSpec, Topology, dead_letter_exchange_name,
    dead_letter_queue_name, declare_topology,
};
