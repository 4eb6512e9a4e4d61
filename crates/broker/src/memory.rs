//! In-process broker with topic-exchange semantics.
//!
//! [`InMemoryBroker`] plays the broker server; every [`InMemoryConnection`]
//! obtained from it through [`BrokerConnector::connect`] is one client
//! connection. Routing, durability checks, requeue with delay, dead-lettering
//! and redelivery of unacknowledged messages on close behave like an AMQP
//! broker, so services run unchanged against it in tests and single-process
//! deployments.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::broker::{Broker, BrokerConnector};
use crate::error::{BrokerError, Result};
use crate::message::{Delivery, MessageProperties, OutboundMessage, RETRY_COUNT_HEADER, Redelivery};
use crate::routing::{topic_matches, validate_pattern};
use crate::topology::{ExchangeKind, ExchangeSpec, QueueBinding, QueueSpec};

/// A message sitting in a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub redelivered: bool,
    not_before: Option<Instant>,
}

impl QueuedMessage {
    fn is_eligible(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }

    fn to_delivery(&self, delivery_tag: u64) -> Delivery {
        Delivery {
            delivery_tag,
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            redelivered: self.redelivered,
            body: self.body.clone(),
            properties: self.properties.clone(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.properties.retry_count()
    }
}

#[derive(Debug)]
struct Outstanding {
    connection_id: u64,
    message: QueuedMessage,
}

#[derive(Debug)]
struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<QueuedMessage>,
    outstanding: HashMap<u64, Outstanding>,
}

enum Eligible {
    Ready(QueuedMessage),
    NotBefore(Instant),
    Empty,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            outstanding: HashMap::new(),
        }
    }

    fn take_eligible(&mut self, now: Instant) -> Eligible {
        if let Some(message) = self
            .ready
            .iter()
            .position(|m| m.is_eligible(now))
            .and_then(|idx| self.ready.remove(idx))
        {
            return Eligible::Ready(message);
        }

        match self.ready.iter().filter_map(|m| m.not_before).min() {
            Some(at) => Eligible::NotBefore(at),
            None => Eligible::Empty,
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<QueueBinding>,
    next_delivery_tag: u64,
    next_connection_id: u64,
    open_connections: HashSet<u64>,
    refuse_connections: u32,
    publish_failures: u32,
    publish_unavailable: bool,
    fetch_failures: u32,
    ack_failures: u32,
}

impl BrokerState {
    fn ensure_open(&self, connection_id: u64) -> Result<()> {
        if self.open_connections.contains(&connection_id) {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut QueueState> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))
    }

    /// Copies `message` into every queue bound to `exchange` whose binding
    /// matches the routing key. Returns the number of queues reached.
    fn route(&mut self, exchange: &str, message: QueuedMessage) -> usize {
        let Some(kind) = self.exchanges.get(exchange).map(|e| e.kind) else {
            return 0;
        };

        let mut targets: Vec<&str> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let matched = match kind {
                ExchangeKind::Topic => {
                    topic_matches(&binding.routing_key_pattern, &message.routing_key)
                }
                ExchangeKind::Direct => binding.routing_key_pattern == message.routing_key,
            };
            if matched && !targets.contains(&binding.queue.as_str()) {
                targets.push(&binding.queue);
            }
        }

        let targets: Vec<String> = targets.into_iter().map(str::to_string).collect();
        let mut delivered = 0;
        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message.clone());
                delivered += 1;
            }
        }
        delivered
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-process broker.
///
/// Cloning is cheap and every clone refers to the same broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connection attempts fail.
    pub async fn refuse_next_connections(&self, n: u32) {
        self.inner.state.lock().await.refuse_connections = n;
    }

    /// Makes the next `n` publishes fail.
    pub async fn fail_next_publishes(&self, n: u32) {
        self.inner.state.lock().await.publish_failures = n;
    }

    /// Makes every publish fail until switched back.
    pub async fn set_publish_unavailable(&self, unavailable: bool) {
        self.inner.state.lock().await.publish_unavailable = unavailable;
    }

    /// Makes the next `n` fetches fail.
    pub async fn fail_next_fetches(&self, n: u32) {
        self.inner.state.lock().await.fetch_failures = n;
    }

    /// Makes the next `n` acks fail. The delivery stays outstanding.
    pub async fn fail_next_acks(&self, n: u32) {
        self.inner.state.lock().await.ack_failures = n;
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.state.lock().await.open_connections.len()
    }

    /// Number of messages waiting in `queue`, including delayed requeues.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Number of deliveries from `queue` that are neither acked nor nacked.
    pub async fn outstanding_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.outstanding.len())
    }

    /// Snapshot of the messages waiting in `queue`, oldest first.
    pub async fn messages(&self, queue: &str) -> Vec<QueuedMessage> {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The declared spec of `queue`, if it exists.
    pub async fn queue_spec(&self, queue: &str) -> Option<QueueSpec> {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.spec.clone())
    }

    /// Number of bindings across all exchanges.
    pub async fn binding_count(&self) -> usize {
        self.inner.state.lock().await.bindings.len()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<InMemoryConnection> {
        let mut state = self.inner.state.lock().await;

        if state.refuse_connections > 0 {
            state.refuse_connections -= 1;
            return Err(BrokerError::ConnectionFailed("connection refused".to_string()));
        }

        state.next_connection_id += 1;
        let id = state.next_connection_id;
        state.open_connections.insert(id);
        tracing::debug!(connection_id = id, "connection opened");

        Ok(InMemoryConnection {
            id,
            broker: self.clone(),
        })
    }
}

/// A client connection to an [`InMemoryBroker`].
///
/// Clones share the connection; closing any clone closes it for all.
#[derive(Debug, Clone)]
pub struct InMemoryConnection {
    id: u64,
    broker: InMemoryBroker,
}

impl InMemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn shared(&self) -> &Shared {
        &self.broker.inner
    }
}

#[async_trait]
impl Broker for InMemoryConnection {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        state.ensure_open(self.id)?;

        match state.exchanges.get(&spec.name) {
            Some(existing) if existing == spec => Ok(()),
            Some(existing) => Err(BrokerError::TopologyMismatch {
                kind: "exchange",
                name: spec.name.clone(),
                reason: format!("declared as {existing:?}, requested {spec:?}"),
            }),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                tracing::debug!(exchange = %spec.name, kind = ?spec.kind, "exchange declared");
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        state.ensure_open(self.id)?;

        match state.queues.get(&spec.name) {
            Some(existing) if &existing.spec == spec => Ok(()),
            Some(existing) => Err(BrokerError::TopologyMismatch {
                kind: "queue",
                name: spec.name.clone(),
                reason: format!("declared as {:?}, requested {spec:?}", existing.spec),
            }),
            None => {
                state
                    .queues
                    .insert(spec.name.clone(), QueueState::new(spec.clone()));
                tracing::debug!(queue = %spec.name, "queue declared");
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        state.ensure_open(self.id)?;

        let kind = state
            .exchanges
            .get(&binding.exchange)
            .map(|e| e.kind)
            .ok_or_else(|| BrokerError::ExchangeNotFound(binding.exchange.clone()))?;
        if !state.queues.contains_key(&binding.queue) {
            return Err(BrokerError::QueueNotFound(binding.queue.clone()));
        }
        match kind {
            ExchangeKind::Topic => validate_pattern(&binding.routing_key_pattern)?,
            ExchangeKind::Direct if binding.routing_key_pattern.is_empty() => {
                return Err(BrokerError::InvalidPattern(String::new()));
            }
            ExchangeKind::Direct => {}
        }

        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
            tracing::debug!(
                exchange = %binding.exchange,
                queue = %binding.queue,
                pattern = %binding.routing_key_pattern,
                "queue bound"
            );
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: OutboundMessage) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        state.ensure_open(self.id)?;

        let failure = if state.publish_unavailable {
            Some("broker unavailable")
        } else if state.publish_failures > 0 {
            state.publish_failures -= 1;
            Some("injected publish failure")
        } else {
            None
        };
        if let Some(reason) = failure {
            return Err(BrokerError::PublishFailed {
                exchange: exchange.to_string(),
                routing_key: message.routing_key,
                reason: reason.to_string(),
            });
        }

        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::ExchangeNotFound(exchange.to_string()));
        }

        let routing_key = message.routing_key.clone();
        let queued = QueuedMessage {
            exchange: exchange.to_string(),
            routing_key: message.routing_key,
            body: message.body,
            properties: message.properties,
            redelivered: false,
            not_before: None,
        };
        let delivered = state.route(exchange, queued);
        drop(state);

        if delivered == 0 {
            tracing::warn!(%exchange, %routing_key, "unroutable message dropped");
        } else {
            self.shared().notify.notify_waiters();
        }
        Ok(())
    }

    async fn fetch(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.shared().notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_eligible = {
                let mut guard = self.shared().state.lock().await;
                let state = &mut *guard;
                state.ensure_open(self.id)?;
                if state.fetch_failures > 0 {
                    state.fetch_failures -= 1;
                    return Err(BrokerError::Channel("injected fetch failure".to_string()));
                }

                let tag = state.next_delivery_tag + 1;
                let queue_state = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

                match queue_state.take_eligible(Instant::now()) {
                    Eligible::Ready(message) => {
                        let delivery = message.to_delivery(tag);
                        queue_state.outstanding.insert(
                            tag,
                            Outstanding {
                                connection_id: self.id,
                                message,
                            },
                        );
                        state.next_delivery_tag = tag;
                        return Ok(Some(delivery));
                    }
                    Eligible::NotBefore(at) => Some(at),
                    Eligible::Empty => None,
                }
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_eligible.map_or(deadline, |at| at.min(deadline));

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        state.ensure_open(self.id)?;
        if state.ack_failures > 0 {
            state.ack_failures -= 1;
            return Err(BrokerError::Channel("injected ack failure".to_string()));
        }

        state
            .queue_mut(queue)?
            .outstanding
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| BrokerError::UnknownDeliveryTag {
                queue: queue.to_string(),
                tag: delivery_tag,
            })
    }

    async fn nack(
        &self,
        queue: &str,
        delivery_tag: u64,
        requeue: Option<Redelivery>,
    ) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        state.ensure_open(self.id)?;

        let queue_state = state.queue_mut(queue)?;
        let Outstanding { mut message, .. } = queue_state
            .outstanding
            .remove(&delivery_tag)
            .ok_or_else(|| BrokerError::UnknownDeliveryTag {
                queue: queue.to_string(),
                tag: delivery_tag,
            })?;

        match requeue {
            Some(redelivery) => {
                message.properties.headers.insert(
                    RETRY_COUNT_HEADER.to_string(),
                    serde_json::json!(redelivery.retry_count),
                );
                message.redelivered = true;
                message.not_before =
                    (!redelivery.delay.is_zero()).then(|| Instant::now() + redelivery.delay);
                queue_state.ready.push_back(message);
            }
            None => {
                let dead_letter = queue_state.spec.dead_letter_exchange.clone().map(|dlx| {
                    let key = queue_state
                        .spec
                        .dead_letter_routing_key
                        .clone()
                        .unwrap_or_else(|| message.routing_key.clone());
                    (dlx, key)
                });

                match dead_letter {
                    Some((dlx, key)) => {
                        message.properties.headers.insert(
                            "x-first-death-queue".to_string(),
                            serde_json::json!(queue),
                        );
                        message.properties.headers.insert(
                            "x-first-death-reason".to_string(),
                            serde_json::json!("rejected"),
                        );
                        message.routing_key = key;
                        message.exchange = dlx.clone();
                        message.redelivered = false;
                        message.not_before = None;
                        if state.route(&dlx, message) == 0 {
                            tracing::warn!(%queue, %dlx, "dead-lettered message was unroutable");
                        }
                    }
                    None => {
                        tracing::warn!(%queue, "rejected message dropped: no dead-letter exchange");
                    }
                }
            }
        }

        drop(state);
        self.shared().notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.shared().state.lock().await;
        if !state.open_connections.remove(&self.id) {
            return Ok(());
        }

        let mut returned = 0usize;
        for queue in state.queues.values_mut() {
            let mut tags: Vec<u64> = queue
                .outstanding
                .iter()
                .filter(|(_, o)| o.connection_id == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            // Newest first so the oldest ends up at the head of the queue.
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in tags {
                if let Some(Outstanding { mut message, .. }) = queue.outstanding.remove(&tag) {
                    message.redelivered = true;
                    queue.ready.push_front(message);
                    returned += 1;
                }
            }
        }
        drop(state);

        tracing::debug!(connection_id = self.id, returned, "connection closed");
        self.shared().notify.notify_waiters();
        Ok(())
    }
}
