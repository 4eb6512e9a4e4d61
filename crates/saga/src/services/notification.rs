//! Notification service: tells customers how their order ended.

use std::sync::Arc;

use async_trait::async_trait;
use common::{CorrelationId, OrderId};
use events::{EventEnvelope, OrderEvent, OrderStatus};
use resilience::IdempotencyLedger;
use tokio::sync::Mutex;

use crate::consumer::MessageHandler;
use crate::error::{HandlerError, Result};
use crate::order_fulfillment::Service;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub order_id: OrderId,
    pub correlation_id: Option<CorrelationId>,
    pub status: OrderStatus,
    pub message: String,
}

impl Notification {
    fn for_event(envelope: &EventEnvelope) -> Self {
        let status = envelope.status();
        let message = if status == OrderStatus::Paid {
            format!("Order {} confirmed", envelope.order_id)
        } else {
            format!("Order {} rejected", envelope.order_id)
        };

        Self {
            order_id: envelope.order_id,
            correlation_id: envelope.correlation_id,
            status,
            message,
        }
    }
}

/// Delivers notifications to customers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            order_id = %notification.order_id,
            status = %notification.status,
            "{}",
            notification.message
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Records notifications for inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every notification fail until switched back.
    pub async fn set_fail(&self, fail: bool) {
        self.state.lock().await.fail = fail;
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.state.lock().await.sent.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail {
            return Err(HandlerError::Notification("mail relay down".to_string()));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}

/// Consumes `order.confirmed` and `order.rejected` and notifies the
/// customer once per order.
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
    ledger: Arc<dyn IdempotencyLedger>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        Self { notifier, ledger }
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    fn service(&self) -> &'static str {
        Service::Notification.name()
    }

    #[tracing::instrument(skip(self, envelope), fields(order_id = %envelope.order_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        if matches!(envelope.event, OrderEvent::OrderCreated(_)) {
            return Err(HandlerError::Unsupported {
                service: self.service(),
                event_type: envelope.event_type(),
            });
        }

        let key = envelope.order_id.to_string();
        if super::is_duplicate(self.ledger.as_ref(), self.service(), &key, envelope).await? {
            return Ok(());
        }

        self.notifier
            .notify(&Notification::for_event(envelope))
            .await?;
        self.ledger.mark_processed(self.service(), &key).await?;
        Ok(())
    }
}
