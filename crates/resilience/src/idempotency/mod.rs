//! Idempotency ledger.
//!
//! Delivery is at-least-once, so a service can see the same business event
//! more than once. Before any side effect a handler asks
//! [`IdempotencyLedger::already_processed`]; once the result event has been
//! handed to the broker it calls [`IdempotencyLedger::mark_processed`].
//!
//! Concurrent markers of the same `(service, business_key)` are serialized by
//! a uniqueness constraint. Losing that race is reported as
//! [`MarkOutcome::AlreadyProcessed`], never as an error.
//!
//! A crash between the side effect and the mark repeats the side effect on
//! redelivery. That is the accepted at-least-once tradeoff.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;

/// A business key a service has finished handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessageRecord {
    pub service: String,
    pub business_key: String,
    pub processed_at: DateTime<Utc>,
}

/// Result of [`IdempotencyLedger::mark_processed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This call recorded the key.
    Recorded,
    /// The key was already recorded, possibly by a concurrent writer.
    AlreadyProcessed,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Returns true if `service` has already handled `business_key`.
    async fn already_processed(&self, service: &str, business_key: &str) -> Result<bool>;

    /// Records that `service` has handled `business_key`.
    async fn mark_processed(&self, service: &str, business_key: &str) -> Result<MarkOutcome>;

    /// Looks up the record for `(service, business_key)`.
    async fn record(
        &self,
        service: &str,
        business_key: &str,
    ) -> Result<Option<ProcessedMessageRecord>>;
}

fn count_duplicate(service: &str) {
    metrics::counter!("idempotency_duplicates_total", "service" => service.to_string())
        .increment(1);
}
