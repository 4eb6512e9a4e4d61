//! The event envelope and its closed set of payloads.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::{CorrelationId, OrderId, Sku};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::routing::RoutingKey;

/// Lifecycle status of an order as seen by the status-update consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Validated,
    Rejected,
    Paid,
    Failed,
}

impl OrderStatus {
    /// Returns the wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// Parses the wire form of the status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(OrderStatus::Created),
            "VALIDATED" => Some(OrderStatus::Validated),
            "REJECTED" => Some(OrderStatus::Rejected),
            "PAID" => Some(OrderStatus::Paid),
            "FAILED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the inventory check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Validated,
    Rejected,
}

/// Outcome of the payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

/// Payload of `order.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// SKU of the ordered product.
    pub product: Sku,
    /// Number of units ordered.
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
}

/// Payload of `order.validated` and inventory-originated `order.rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryResult {
    pub status: InventoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `order.confirmed` and payment-originated `order.rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub status: PaymentStatus,
}

/// Closed union of every event published on the orders exchange.
///
/// The variant name is the `event_type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    InventoryResult(InventoryResult),
    PaymentResult(PaymentResult),
}

impl OrderEvent {
    /// Inventory reserved the stock.
    pub fn inventory_validated() -> Self {
        OrderEvent::InventoryResult(InventoryResult {
            status: InventoryStatus::Validated,
            reason: None,
        })
    }

    /// Inventory could not reserve the stock.
    pub fn inventory_rejected(reason: impl Into<String>) -> Self {
        OrderEvent::InventoryResult(InventoryResult {
            status: InventoryStatus::Rejected,
            reason: Some(reason.into()),
        })
    }

    /// Payment finished with the given status.
    pub fn payment(status: PaymentStatus) -> Self {
        OrderEvent::PaymentResult(PaymentResult { status })
    }

    /// Returns the `event_type` wire value.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::InventoryResult(_) => "InventoryResult",
            OrderEvent::PaymentResult(_) => "PaymentResult",
        }
    }

    /// Returns the routing key this event is published under.
    pub fn routing_key(&self) -> RoutingKey {
        match self {
            OrderEvent::OrderCreated(_) => RoutingKey::OrderCreated,
            OrderEvent::InventoryResult(r) => match r.status {
                InventoryStatus::Validated => RoutingKey::OrderValidated,
                InventoryStatus::Rejected => RoutingKey::OrderRejected,
            },
            OrderEvent::PaymentResult(r) => match r.status {
                PaymentStatus::Paid => RoutingKey::OrderConfirmed,
                PaymentStatus::Failed => RoutingKey::OrderRejected,
            },
        }
    }

    /// Returns the order status implied by this event.
    pub fn status(&self) -> OrderStatus {
        match self {
            OrderEvent::OrderCreated(_) => OrderStatus::Created,
            OrderEvent::InventoryResult(r) => match r.status {
                InventoryStatus::Validated => OrderStatus::Validated,
                InventoryStatus::Rejected => OrderStatus::Rejected,
            },
            OrderEvent::PaymentResult(r) => match r.status {
                PaymentStatus::Paid => OrderStatus::Paid,
                PaymentStatus::Failed => OrderStatus::Failed,
            },
        }
    }
}

/// A message on the orders exchange.
///
/// Envelopes are immutable once published. Result events are built with
/// [`EventEnvelope::derive`], which copies `order_id` and `correlation_id`
/// from the event being answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: OrderEvent,

    pub order_id: OrderId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    /// Written as RFC 3339. Read as RFC 3339 or as a naive ISO 8601
    /// date-time, which is taken to be UTC.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{raw}': {e}")))
}

/// Parses an RFC 3339 timestamp, or a naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` as UTC.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => Ok(at.with_timezone(&Utc)),
        Err(rfc3339_err) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc3339_err),
    }
}

impl EventEnvelope {
    /// Builds the `order.created` envelope that starts a saga instance.
    pub fn order_created(
        order_id: OrderId,
        correlation_id: CorrelationId,
        created: OrderCreated,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: OrderEvent::OrderCreated(created),
            order_id,
            correlation_id: Some(correlation_id),
            timestamp: Some(at),
        }
    }

    /// Builds an event that answers this one within the same saga instance.
    pub fn derive(&self, event: OrderEvent, at: DateTime<Utc>) -> Self {
        Self {
            event,
            order_id: self.order_id,
            correlation_id: self.correlation_id,
            timestamp: Some(at),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    pub fn routing_key(&self) -> RoutingKey {
        self.event.routing_key()
    }

    pub fn status(&self) -> OrderStatus {
        self.event.status()
    }
}

/// Decodes an envelope from a UTF-8 JSON body.
pub fn parse(body: &[u8]) -> Result<EventEnvelope> {
    serde_json::from_slice(body).map_err(EnvelopeError::Malformed)
}

/// Encodes an envelope as a UTF-8 JSON body.
pub fn serialize(envelope: &EventEnvelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(EnvelopeError::Serialization)
}
