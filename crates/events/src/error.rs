use thiserror::Error;

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The body is not a valid envelope: not JSON, missing `event_type` or
    /// `order_id`, an unknown `event_type`, or a field of the wrong type.
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope could not be encoded.
    #[error("Envelope serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A routing key outside the order namespace.
    #[error("Unknown routing key: {0}")]
    UnknownRoutingKey(String),
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
