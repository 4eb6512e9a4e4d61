//! The choreography services. Each one is a [`MessageHandler`](crate::MessageHandler)
//! behind its own queue.

pub mod analytics;
pub mod inventory;
pub mod notification;
pub mod order_status;
pub mod payment;

use events::EventEnvelope;
use resilience::IdempotencyLedger;

use crate::error::Result;

pub use analytics::AnalyticsHandler;
pub use inventory::InventoryHandler;
pub use notification::{
    InMemoryNotifier, LogNotifier, Notification, NotificationHandler, Notifier,
};
pub use order_status::OrderStatusHandler;
pub use payment::{ParityPaymentGateway, PaymentGateway, PaymentHandler};

/// Returns true, after logging and counting it, if `service` has already
/// handled `business_key`.
async fn is_duplicate(
    ledger: &dyn IdempotencyLedger,
    service: &'static str,
    business_key: &str,
    envelope: &EventEnvelope,
) -> Result<bool> {
    if !ledger.already_processed(service, business_key).await? {
        return Ok(false);
    }

    metrics::counter!("duplicate_deliveries_total", "service" => service).increment(1);
    tracing::info!(
        %service,
        %business_key,
        order_id = %envelope.order_id,
        event_type = envelope.event_type(),
        "duplicate delivery skipped"
    );
    Ok(true)
}
