//! Order fulfillment choreography.
//!
//! Services never call each other. Each one consumes events from its own
//! queue on the orders exchange and publishes the event that moves the
//! order forward:
//!
//! 1. The producer stores the order and publishes `order.created`
//! 2. Inventory reserves stock and publishes `order.validated` or `order.rejected`
//! 3. Payment charges validated orders and publishes `order.confirmed` or `order.rejected`
//! 4. Order status, notification and analytics react to the outcome
//!
//! Every consumer retries failed deliveries with exponential backoff and
//! dead-letters them once the retries are spent.

pub mod analytics;
pub mod consumer;
pub mod db;
pub mod error;
pub mod health;
pub mod order_fulfillment;
pub mod orders;
pub mod producer;
pub mod publisher;
pub mod services;
pub mod state;
pub mod stock;

pub use analytics::{
    AnalyticsCounters, AnalyticsEvent, AnalyticsStore, AnalyticsSummary, InMemoryAnalyticsStore,
    PostgresAnalyticsStore,
};
pub use consumer::{Consumer, ConsumerConfig, MessageHandler, Outcome};
pub use db::run_migrations;
pub use error::{HandlerError, ProducerError, PublishError, StoreError};
pub use health::{ConsumerHealth, ConsumerStatus};
pub use order_fulfillment::Service;
pub use orders::{InMemoryOrderStore, NewOrder, OrderRecord, OrderStatusStore, PostgresOrderStore};
pub use producer::OrderProducer;
pub use publisher::EventPublisher;
pub use services::{
    AnalyticsHandler, InMemoryNotifier, InventoryHandler, LogNotifier, Notification,
    NotificationHandler, Notifier, OrderStatusHandler, ParityPaymentGateway, PaymentGateway, PaymentHandler,
};
pub use state::DeliveryState;
pub use stock::{InMemoryStockStore, PostgresStockStore, StockStore};
