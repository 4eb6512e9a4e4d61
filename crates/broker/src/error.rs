use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// A single connection attempt failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Every connection attempt failed. Callers must not continue without a broker.
    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    /// The connection was closed.
    #[error("Connection closed")]
    Closed,

    /// A broker operation failed on an open connection.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An exchange or queue already exists with different properties.
    #[error("Topology mismatch for {kind} '{name}': {reason}")]
    TopologyMismatch {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A binding pattern that is not a valid dot-separated topic pattern.
    #[error("Invalid binding pattern: '{0}'")]
    InvalidPattern(String),

    /// Ack or nack for a delivery that is not outstanding on this queue.
    #[error("Unknown delivery tag {tag} on queue '{queue}'")]
    UnknownDeliveryTag { queue: String, tag: u64 },

    /// The broker refused or failed to accept a published message.
    #[error("Publish to '{exchange}' with key '{routing_key}' failed: {reason}")]
    PublishFailed {
        exchange: String,
        routing_key: String,
        reason: String,
    },
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
