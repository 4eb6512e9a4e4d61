//! Liveness of the consumers running in this process.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsumerStatus {
    Running,
    /// The broker has failed this many times in a row; the loop is backing off.
    Failing { consecutive_errors: u32 },
    Stopped,
}

impl ConsumerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ConsumerStatus::Running)
    }
}

/// Shared status board keyed by queue name.
#[derive(Debug, Clone, Default)]
pub struct ConsumerHealth {
    inner: Arc<RwLock<BTreeMap<String, ConsumerStatus>>>,
}

impl ConsumerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, queue: &str, status: ConsumerStatus) {
        self.inner.write().await.insert(queue.to_string(), status);
    }

    pub async fn get(&self, queue: &str) -> Option<ConsumerStatus> {
        self.inner.read().await.get(queue).copied()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ConsumerStatus> {
        self.inner.read().await.clone()
    }

    /// True when every registered consumer is running. Vacuously true when
    /// none are registered.
    pub async fn all_running(&self) -> bool {
        self.inner.read().await.values().all(ConsumerStatus::is_running)
    }
}
