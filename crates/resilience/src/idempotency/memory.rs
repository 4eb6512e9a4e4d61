use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{IdempotencyLedger, MarkOutcome, ProcessedMessageRecord, Result, count_duplicate};

type Key = (String, String);

/// In-memory ledger. The map's key uniqueness stands in for the table
/// constraint.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    entries: Arc<RwLock<HashMap<Key, DateTime<Utc>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

fn key(service: &str, business_key: &str) -> Key {
    (service.to_string(), business_key.to_string())
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn already_processed(&self, service: &str, business_key: &str) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .await
            .contains_key(&key(service, business_key)))
    }

    async fn mark_processed(&self, service: &str, business_key: &str) -> Result<MarkOutcome> {
        let mut entries = self.entries.write().await;

        match entries.entry(key(service, business_key)) {
            Entry::Occupied(_) => {
                tracing::debug!(%service, %business_key, "already marked");
                count_duplicate(service);
                Ok(MarkOutcome::AlreadyProcessed)
            }
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(MarkOutcome::Recorded)
            }
        }
    }

    async fn record(
        &self,
        service: &str,
        business_key: &str,
    ) -> Result<Option<ProcessedMessageRecord>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&key(service, business_key))
            .map(|processed_at| ProcessedMessageRecord {
                service: service.to_string(),
                business_key: business_key.to_string(),
                processed_at: *processed_at,
            }))
    }
}
