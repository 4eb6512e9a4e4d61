use std::collections::BTreeMap;
use std::time::Duration;

/// Header carrying how many times a message has been requeued after a failure.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Message headers.
pub type Headers = BTreeMap<String, serde_json::Value>;

/// Per-message properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    /// Persistent messages survive a broker restart when routed to durable queues.
    pub persistent: bool,
    pub headers: Headers,
}

impl MessageProperties {
    /// Properties for a persistent JSON message.
    pub fn persistent_json() -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            persistent: true,
            headers: Headers::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Reads `x-retry-count`, defaulting to 0 when absent or not a non-negative integer.
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(RETRY_COUNT_HEADER)
            .and_then(serde_json::Value::as_u64)
            .map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX))
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl OutboundMessage {
    /// A persistent JSON message.
    pub fn persistent_json(routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            properties: MessageProperties::persistent_json(),
        }
    }
}

/// A message handed to a consumer. It stays outstanding until acked or nacked.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the message was delivered before and returned to the queue.
    pub redelivered: bool,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl Delivery {
    pub fn retry_count(&self) -> u32 {
        self.properties.retry_count()
    }
}

/// How a negatively acknowledged message goes back to its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redelivery {
    /// Value written to `x-retry-count` on the requeued message.
    pub retry_count: u32,
    /// Time before the message becomes eligible for delivery again.
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_retry_count_defaults_to_zero() {
        assert_eq!(MessageProperties::default().retry_count(), 0);
        assert_eq!(MessageProperties::persistent_json().retry_count(), 0);
    }

    #[test]
    fn test_retry_count_reads_header() {
        let props = MessageProperties::persistent_json().with_header(RETRY_COUNT_HEADER, json!(2));
        assert_eq!(props.retry_count(), 2);
    }

    #[test]
    fn test_retry_count_ignores_garbage() {
        let props = MessageProperties::default().with_header(RETRY_COUNT_HEADER, json!("three"));
        assert_eq!(props.retry_count(), 0);

        let props = MessageProperties::default().with_header(RETRY_COUNT_HEADER, json!(-1));
        assert_eq!(props.retry_count(), 0);
    }

    #[test]
    fn test_persistent_json_message() {
        let msg = OutboundMessage::persistent_json("order.created", b"{}".to_vec());
        assert!(msg.properties.persistent);
        assert_eq!(msg.properties.content_type.as_deref(), Some("application/json"));
    }
}
