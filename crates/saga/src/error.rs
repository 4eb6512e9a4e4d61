//! Error types for the choreography services.

use std::time::Duration;

use broker::BrokerError;
use common::OrderId;
use events::EnvelopeError;
use resilience::LedgerError;
use thiserror::Error;

/// Errors from the order status and stock stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A stored value could not be mapped back to a domain type.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    /// The store is temporarily unable to serve requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Errors from publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The publish circuit breaker rejected the call.
    #[error("Publish circuit is open")]
    CircuitOpen,

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors from handling a delivery.
///
/// The consumer uses [`HandlerError::is_retryable`] to choose between
/// requeue with backoff and immediate dead-lettering.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The body is not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] EnvelopeError),

    /// The queue delivered an event type this service does not handle.
    #[error("{service} does not handle {event_type}")]
    Unsupported {
        service: &'static str,
        event_type: &'static str,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Idempotency ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl HandlerError {
    /// Returns false for failures that no amount of redelivery can fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, HandlerError::Unsupported { .. })
    }
}

/// Errors from submitting a new order.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Invalid order: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Convenience type alias for handler results.
pub type Result<T> = std::result::Result<T, HandlerError>;
