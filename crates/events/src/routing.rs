//! Routing-key namespace of the orders exchange.
//!
//! Keys are dot-separated and all live under the `order.` prefix, so a
//! binding on `order.*` sees every key while the exact keys below stay
//! disjoint. New event types extend this enum with a new key.

use std::str::FromStr;

use crate::error::EnvelopeError;

/// Name of the topic exchange every service publishes to.
pub const EXCHANGE: &str = "orders.exchange";

/// A routing key in the order namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// A new order was submitted.
    OrderCreated,
    /// Stock was reserved for the order.
    OrderValidated,
    /// The order was rejected by inventory or payment.
    OrderRejected,
    /// Payment succeeded; the order is complete.
    OrderConfirmed,
}

impl RoutingKey {
    /// Every key in the namespace.
    pub const ALL: [RoutingKey; 4] = [
        RoutingKey::OrderCreated,
        RoutingKey::OrderValidated,
        RoutingKey::OrderRejected,
        RoutingKey::OrderConfirmed,
    ];

    /// Returns the wire form of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::OrderCreated => "order.created",
            RoutingKey::OrderValidated => "order.validated",
            RoutingKey::OrderRejected => "order.rejected",
            RoutingKey::OrderConfirmed => "order.confirmed",
        }
    }

    /// Returns true for keys that end a saga instance.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoutingKey::OrderRejected | RoutingKey::OrderConfirmed)
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingKey {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownRoutingKey(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_keys_are_distinct_and_namespaced() {
        let keys: HashSet<&str> = RoutingKey::ALL.iter().map(RoutingKey::as_str).collect();
        assert_eq!(keys.len(), RoutingKey::ALL.len());
        assert!(keys.iter().all(|k| k.starts_with("order.")));
        assert!(keys.iter().all(|k| k.split('.').count() == 2));
    }

    #[test]
    fn test_parse_roundtrip() {
        for key in RoutingKey::ALL {
            assert_eq!(key.as_str().parse::<RoutingKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = "order.shipped".parse::<RoutingKey>();
        assert!(matches!(result, Err(EnvelopeError::UnknownRoutingKey(_))));
    }

    #[test]
    fn test_terminal_keys() {
        assert!(!RoutingKey::OrderCreated.is_terminal());
        assert!(!RoutingKey::OrderValidated.is_terminal());
        assert!(RoutingKey::OrderRejected.is_terminal());
        assert!(RoutingKey::OrderConfirmed.is_terminal());
    }
}
