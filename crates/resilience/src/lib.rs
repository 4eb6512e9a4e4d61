//! Resilience primitives for the order fulfillment consumers.
//!
//! - [`CircuitBreaker`] isolates a failing dependency behind CLOSED / OPEN /
//!   HALF_OPEN states.
//! - [`RetryPolicy`] decides between requeue with exponential backoff and
//!   dead-lettering.
//! - [`IdempotencyLedger`] records which business keys a service has already
//!   handled, so redeliveries do not repeat side effects.

pub mod circuit_breaker;
pub mod idempotency;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerError,
    CircuitSnapshot, CircuitState,
};
pub use idempotency::{
    IdempotencyLedger, InMemoryLedger, LedgerError, MarkOutcome, PostgresLedger,
    ProcessedMessageRecord,
};
pub use retry::{RetryDecision, RetryPolicy};
