use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use events::EventEnvelope;
use tokio::sync::RwLock;

use super::{AnalyticsCounters, AnalyticsEvent, AnalyticsStore};
use crate::error::StoreError;

/// Events kept by [`InMemoryAnalyticsStore::new`].
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct State {
    counters: AnalyticsCounters,
    log: VecDeque<AnalyticsEvent>,
}

/// Process-local analytics. Counters are exact; the event log keeps only
/// the newest `capacity` events.
#[derive(Debug, Clone)]
pub struct InMemoryAnalyticsStore {
    state: Arc<RwLock<State>>,
    capacity: usize,
}

impl Default for InMemoryAnalyticsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn log_len(&self) -> usize {
        self.state.read().await.log.len()
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalyticsStore {
    async fn record(&self, envelope: &EventEnvelope) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.counters.apply(&envelope.event);

        if state.log.len() == self.capacity {
            state.log.pop_front();
            metrics::counter!("analytics_log_evictions_total").increment(1);
        }
        state.log.push_back(AnalyticsEvent::observed(envelope, Utc::now()));
        Ok(())
    }

    async fn counters(&self) -> Result<AnalyticsCounters, StoreError> {
        Ok(self.state.read().await.counters)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AnalyticsEvent>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .log
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn trace(&self, order_id: OrderId) -> Result<Vec<AnalyticsEvent>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .log
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use common::{CorrelationId, Sku};
    use events::{OrderCreated, OrderEvent, PaymentStatus};

    use super::*;

    fn created(id: i64) -> EventEnvelope {
        EventEnvelope::order_created(
            OrderId::new(id),
            CorrelationId::new(),
            OrderCreated {
                product: Sku::from("SKU-1"),
                quantity: 1,
                customer_name: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let store = InMemoryAnalyticsStore::new();
        for id in 1..=5 {
            store.record(&created(id)).await.unwrap();
        }

        let ids: Vec<i64> = store
            .recent(2)
            .await
            .unwrap()
            .iter()
            .map(|e| e.order_id.as_i64())
            .collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[tokio::test]
    async fn test_log_is_bounded_but_counters_are_not() {
        let store = InMemoryAnalyticsStore::with_capacity(3);
        for id in 1..=5 {
            store.record(&created(id)).await.unwrap();
        }
        store
            .record(&created(5).derive(OrderEvent::payment(PaymentStatus::Paid), Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.log_len().await, 3);
        assert!(store.trace(OrderId::new(1)).await.unwrap().is_empty());
        assert_eq!(store.trace(OrderId::new(5)).await.unwrap().len(), 2);

        let counters = store.counters().await.unwrap();
        assert_eq!(counters.total_events, 6);
        assert_eq!(counters.orders_created, 5);
        assert_eq!(counters.orders_completed, 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_keeps_latest_event() {
        let store = InMemoryAnalyticsStore::with_capacity(0);
        store.record(&created(1)).await.unwrap();
        store.record(&created(2)).await.unwrap();

        assert_eq!(store.capacity(), 1);
        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].order_id, OrderId::new(2));
    }
}
