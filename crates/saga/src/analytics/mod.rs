//! Analytics read model: running counters over every event on the exchange
//! and a log of each observed event.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId};
use events::{EventEnvelope, InventoryStatus, OrderEvent, OrderStatus, PaymentStatus};
use serde::Serialize;

use crate::error::StoreError;

pub use memory::InMemoryAnalyticsStore;
pub use postgres::PostgresAnalyticsStore;

/// Running counters over all observed events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsCounters {
    pub total_events: u64,
    pub orders_created: u64,
    pub inventory_validated: u64,
    pub inventory_rejected: u64,
    pub payments_successful: u64,
    pub orders_completed: u64,
    pub payments_failed: u64,
}

impl AnalyticsCounters {
    /// Names of the counters one event increments, `total_events` first.
    pub fn metrics_for(event: &OrderEvent) -> &'static [&'static str] {
        match event {
            OrderEvent::OrderCreated(_) => &["total_events", "orders_created"],
            OrderEvent::InventoryResult(r) => match r.status {
                InventoryStatus::Validated => &["total_events", "inventory_validated"],
                InventoryStatus::Rejected => &["total_events", "inventory_rejected"],
            },
            OrderEvent::PaymentResult(r) => match r.status {
                PaymentStatus::Paid => &["total_events", "payments_successful", "orders_completed"],
                PaymentStatus::Failed => &["total_events", "payments_failed"],
            },
        }
    }

    fn slot(&mut self, metric: &str) -> Option<&mut u64> {
        match metric {
            "total_events" => Some(&mut self.total_events),
            "orders_created" => Some(&mut self.orders_created),
            "inventory_validated" => Some(&mut self.inventory_validated),
            "inventory_rejected" => Some(&mut self.inventory_rejected),
            "payments_successful" => Some(&mut self.payments_successful),
            "orders_completed" => Some(&mut self.orders_completed),
            "payments_failed" => Some(&mut self.payments_failed),
            _ => None,
        }
    }

    /// Applies one event.
    pub fn apply(&mut self, event: &OrderEvent) {
        for metric in Self::metrics_for(event) {
            if let Some(slot) = self.slot(metric) {
                *slot += 1;
            }
        }
    }

    /// Sets a counter by name. Unknown names are ignored.
    pub fn set(&mut self, metric: &str, value: u64) {
        if let Some(slot) = self.slot(metric) {
            *slot = value;
        }
    }
}

/// One observed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsEvent {
    pub order_id: OrderId,
    pub event_type: String,
    pub status: OrderStatus,
    pub correlation_id: Option<CorrelationId>,
    pub recorded_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn observed(envelope: &EventEnvelope, recorded_at: DateTime<Utc>) -> Self {
        Self {
            order_id: envelope.order_id,
            event_type: envelope.event_type().to_string(),
            status: envelope.status(),
            correlation_id: envelope.correlation_id,
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub counters: AnalyticsCounters,
    pub total_orders: u64,
    pub completed: u64,
    pub rejected: u64,
    /// Completed orders as a percentage of created orders, two decimals.
    pub success_rate: f64,
}

impl From<AnalyticsCounters> for AnalyticsSummary {
    fn from(counters: AnalyticsCounters) -> Self {
        let success_rate = if counters.orders_created == 0 {
            0.0
        } else {
            let rate = counters.orders_completed as f64 / counters.orders_created as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };

        Self {
            counters,
            total_orders: counters.orders_created,
            completed: counters.orders_completed,
            rejected: counters.inventory_rejected + counters.payments_failed,
            success_rate,
        }
    }
}

/// Where the analytics service keeps what it observed.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Logs one event and bumps its counters.
    async fn record(&self, envelope: &EventEnvelope) -> Result<(), StoreError>;

    async fn counters(&self) -> Result<AnalyticsCounters, StoreError>;

    /// The most recent `limit` events, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AnalyticsEvent>, StoreError>;

    /// Every retained event of one order, in the order they were observed.
    async fn trace(&self, order_id: OrderId) -> Result<Vec<AnalyticsEvent>, StoreError>;

    async fn summary(&self) -> Result<AnalyticsSummary, StoreError> {
        Ok(AnalyticsSummary::from(self.counters().await?))
    }
}
