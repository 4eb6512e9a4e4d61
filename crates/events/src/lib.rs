//! Canonical message shape exchanged on the orders exchange.
//!
//! Every service in the choreography speaks [`EventEnvelope`]: a JSON object
//! carrying `event_type` and `order_id`, an optional `correlation_id` and
//! `timestamp`, and the payload fields of one [`OrderEvent`] variant. The
//! routing key a message is published under is derived from the envelope,
//! never chosen by the caller.

pub mod envelope;
pub mod error;
pub mod routing;

pub use envelope::{
    EventEnvelope, InventoryResult, InventoryStatus, OrderCreated, OrderEvent, OrderStatus,
    PaymentResult, PaymentStatus, parse, parse_timestamp, serialize,
};
pub use error::{EnvelopeError, Result};
pub use routing::{EXCHANGE, RoutingKey};
