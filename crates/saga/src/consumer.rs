//! Resilient queue consumer.
//!
//! A [`Consumer`] owns one queue. It fetches one delivery at a time and
//! settles it before fetching the next, moving each delivery through
//! [`DeliveryState`]:
//!
//! - handler success: ack
//! - retryable failure with `retry_count < max_retries`: requeue carrying
//!   `retry_count + 1`, eligible again after `base * 2^retry_count`
//! - retryable failure at the limit, or a terminal failure: dead-letter to
//!   `<queue>.dlq`
//!
//! An undecodable body is an ordinary retryable failure, so poison messages
//! end in the dead-letter queue instead of being dropped.
//!
//! A broker error never ends [`Consumer::run`]. The loop logs it, reports
//! the consumer as failing and backs off before trying again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{Broker, BrokerError, Delivery, Redelivery, Topology, declare_topology};
use events::{EXCHANGE, EventEnvelope};
use resilience::{RetryDecision, RetryPolicy};
use tokio::sync::watch;

use crate::error::HandlerError;
use crate::health::{ConsumerHealth, ConsumerStatus};
use crate::order_fulfillment::Service;
use crate::state::DeliveryState;

/// Business logic behind a queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs, metrics and as the idempotency ledger scope.
    fn service(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn service(&self) -> &'static str {
        (**self).service()
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        (**self).handle(envelope).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub exchange: String,
    pub queue: String,
    /// Topic patterns the queue is bound to.
    pub bindings: Vec<String>,
    pub retry: RetryPolicy,
    /// Upper bound on a single fetch; the loop checks for shutdown in between.
    pub poll_wait: Duration,
    /// Pause after the first broker error, doubled for each further one.
    pub error_backoff: Duration,
    pub max_error_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>, bindings: Vec<String>) -> Self {
        Self {
            exchange: EXCHANGE.to_string(),
            queue: queue.into(),
            bindings,
            retry: RetryPolicy::default(),
            poll_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            max_error_backoff: Duration::from_secs(30),
        }
    }

    /// Queue and bindings of one choreography service.
    pub fn for_service(service: Service) -> Self {
        Self::new(
            service.queue(),
            service
                .bindings()
                .iter()
                .map(|key| key.as_str().to_string())
                .collect(),
        )
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    pub fn with_error_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.error_backoff = base;
        self.max_error_backoff = max;
        self
    }

    /// Pause after the `consecutive`-th broker error in a row (1-based).
    pub fn error_delay(&self, consecutive: u32) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(16);
        self.error_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_error_backoff)
    }

    /// Exchange, queue, bindings and the dead-letter path for this consumer.
    pub fn topology(&self) -> Topology {
        let patterns: Vec<&str> = self.bindings.iter().map(String::as_str).collect();
        Topology::for_consumer(&self.exchange, &self.queue, &patterns)
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Requeued { retry_count: u32, delay: Duration },
    DeadLettered { retry_count: u32, reason: String },
}

impl Outcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            Outcome::Acked => DeliveryState::Acked,
            Outcome::Requeued { .. } => DeliveryState::Requeued,
            Outcome::DeadLettered { .. } => DeliveryState::DeadLettered,
        }
    }
}

pub struct Consumer<H> {
    broker: Arc<dyn Broker>,
    handler: H,
    config: ConsumerConfig,
    health: ConsumerHealth,
}

impl<H: MessageHandler> Consumer<H> {
    pub fn new(broker: Arc<dyn Broker>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            broker,
            handler,
            config,
            health: ConsumerHealth::new(),
        }
    }

    /// Reports this consumer's status on a shared board.
    pub fn with_health(mut self, health: ConsumerHealth) -> Self {
        self.health = health;
        self
    }

    pub fn health(&self) -> &ConsumerHealth {
        &self.health
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Declares this consumer's topology. Safe to call on every start.
    pub async fn declare(&self) -> Result<(), BrokerError> {
        declare_topology(self.broker.as_ref(), &self.config.topology()).await
    }

    /// Handles one delivery and settles it with the broker.
    #[tracing::instrument(skip(self, delivery), fields(
        service = self.handler.service(),
        queue = %self.config.queue,
        delivery_tag = delivery.delivery_tag,
        retry_count = delivery.retry_count(),
    ))]
    pub async fn process(&self, delivery: Delivery) -> Result<Outcome, BrokerError> {
        let started = tokio::time::Instant::now();
        let queue = self.config.queue.as_str();
        let retry_count = delivery.retry_count();

        let mut state = DeliveryState::Received;
        self.advance(&mut state, DeliveryState::Processing);

        let result = match events::parse(&delivery.body) {
            Ok(envelope) => {
                tracing::debug!(
                    order_id = %envelope.order_id,
                    event_type = envelope.event_type(),
                    "processing event"
                );
                self.handler.handle(&envelope).await
            }
            Err(e) => Err(HandlerError::from(e)),
        };

        let outcome = match result {
            Ok(()) => {
                self.broker.ack(queue, delivery.delivery_tag).await?;
                Outcome::Acked
            }
            Err(e) => {
                let decision = if e.is_retryable() {
                    self.config.retry.decide(retry_count)
                } else {
                    RetryDecision::DeadLetter
                };

                match decision {
                    RetryDecision::Requeue {
                        retry_count: next,
                        delay,
                    } => {
                        self.broker
                            .nack(
                                queue,
                                delivery.delivery_tag,
                                Some(Redelivery {
                                    retry_count: next,
                                    delay,
                                }),
                            )
                            .await?;
                        tracing::warn!(
                            error = %e,
                            next_retry = next,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "processing failed, requeued"
                        );
                        Outcome::Requeued {
                            retry_count: next,
                            delay,
                        }
                    }
                    RetryDecision::DeadLetter => {
                        self.broker.nack(queue, delivery.delivery_tag, None).await?;
                        tracing::warn!(
                            error = %e,
                            retryable = e.is_retryable(),
                            dead_letter_queue = %broker::dead_letter_queue_name(queue),
                            "processing failed, dead-lettered"
                        );
                        Outcome::DeadLettered {
                            retry_count,
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        self.advance(&mut state, outcome.state());
        metrics::counter!(
            "consumer_messages_total",
            "queue" => self.config.queue.clone(),
            "outcome" => state.as_str()
        )
        .increment(1);
        metrics::histogram!("consumer_processing_seconds", "queue" => self.config.queue.clone())
            .record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Waits up to `poll_wait` for one delivery and processes it.
    pub async fn run_once(&self) -> Result<Option<Outcome>, BrokerError> {
        match self
            .broker
            .fetch(&self.config.queue, self.config.poll_wait)
            .await?
        {
            Some(delivery) => self.process(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consumes until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown interrupts waiting for a delivery or an error backoff, but
    /// never a delivery that is being processed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.config.queue.as_str();
        tracing::info!(
            service = self.handler.service(),
            queue = %queue,
            bindings = ?self.config.bindings,
            "consumer started"
        );
        self.health.set(queue, ConsumerStatus::Running).await;

        let mut consecutive_errors = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let step = tokio::select! {
                fetched = self.broker.fetch(queue, self.config.poll_wait) => fetched,
                _ = shutdown.changed() => break,
            };
            let step = match step {
                Ok(Some(delivery)) => self.process(delivery).await.map(|_| ()),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };

            match step {
                Ok(()) => {
                    if consecutive_errors > 0 {
                        tracing::info!(queue = %queue, after = consecutive_errors, "broker recovered");
                        consecutive_errors = 0;
                        self.health.set(queue, ConsumerStatus::Running).await;
                    }
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = self.config.error_delay(consecutive_errors);
                    metrics::counter!("consumer_broker_errors_total", "queue" => queue.to_string())
                        .increment(1);
                    tracing::error!(
                        queue = %queue,
                        error = %e,
                        consecutive_errors,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "broker error, backing off"
                    );
                    self.health
                        .set(queue, ConsumerStatus::Failing { consecutive_errors })
                        .await;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        self.health.set(queue, ConsumerStatus::Stopped).await;
        tracing::info!(service = self.handler.service(), queue = %queue, "consumer stopped");
    }

    fn advance(&self, state: &mut DeliveryState, next: DeliveryState) {
        debug_assert!(state.can_transition_to(next), "{state} -> {next}");
        tracing::trace!(from = %state, to = %next, "delivery state");
        *state = next;
    }
}
