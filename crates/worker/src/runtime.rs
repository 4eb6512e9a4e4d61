//! Wires stores, publisher and handlers into consumers for one broker connection.

use std::sync::Arc;

use broker::{Broker, BrokerError, Topology, declare_topology};
use events::EXCHANGE;
use resilience::{CircuitBreaker, IdempotencyLedger, InMemoryLedger, PostgresLedger};
use saga::{
    AnalyticsHandler, AnalyticsStore, Consumer, ConsumerConfig, ConsumerHealth, EventPublisher,
    InMemoryAnalyticsStore, InMemoryOrderStore,
    InMemoryStockStore, InventoryHandler, LogNotifier, MessageHandler, NotificationHandler,
    Notifier, OrderProducer, OrderStatusHandler, OrderStatusStore, ParityPaymentGateway,
    PaymentGateway, PaymentHandler, PostgresAnalyticsStore, PostgresOrderStore, PostgresStockStore,
    Service, StockStore,
    StoreError,
};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::AppState;
use crate::config::Config;

/// The stores shared by every service in this process.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStatusStore>,
    pub stock: Arc<dyn StockStore>,
    pub ledger: Arc<dyn IdempotencyLedger>,
    pub analytics: Arc<dyn AnalyticsStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            stock: Arc::new(InMemoryStockStore::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            analytics: Arc::new(InMemoryAnalyticsStore::new()),
        }
    }

    /// Keeps at most `capacity` events in the in-memory analytics log.
    pub fn in_memory_with_analytics_capacity(capacity: usize) -> Self {
        Self {
            analytics: Arc::new(InMemoryAnalyticsStore::with_capacity(capacity)),
            ..Self::in_memory()
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            orders: Arc::new(PostgresOrderStore::new(pool.clone())),
            stock: Arc::new(PostgresStockStore::new(pool.clone())),
            ledger: Arc::new(PostgresLedger::new(pool.clone())),
            analytics: Arc::new(PostgresAnalyticsStore::new(pool)),
        }
    }
}

/// Everything the worker runs on top of one broker connection.
pub struct Runtime {
    config: Config,
    broker: Arc<dyn Broker>,
    stores: Stores,
    publisher: EventPublisher,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    health: ConsumerHealth,
}

impl Runtime {
    pub fn new(config: Config, broker: Arc<dyn Broker>, stores: Stores) -> Self {
        let publisher = EventPublisher::new(
            broker.clone(),
            EXCHANGE,
            CircuitBreaker::new("publish", config.circuit.clone()),
            config.publish_timeout,
        );

        Self {
            config,
            broker,
            stores,
            publisher,
            gateway: Arc::new(ParityPaymentGateway),
            notifier: Arc::new(LogNotifier),
            health: ConsumerHealth::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn health(&self) -> &ConsumerHealth {
        &self.health
    }

    /// Enabled services, in choreography order.
    pub fn services(&self) -> impl Iterator<Item = Service> + '_ {
        Service::ALL
            .into_iter()
            .filter(|service| self.config.runs(*service))
    }

    /// Applies `SEED_STOCK`.
    pub async fn seed_stock(&self) -> Result<(), StoreError> {
        for (sku, quantity) in &self.config.seed_stock {
            self.stores.stock.set_stock(sku, *quantity).await?;
            tracing::info!(%sku, quantity, "stock seeded");
        }
        Ok(())
    }

    /// Declares the exchange and the topology of every enabled service.
    pub async fn declare_topology(&self) -> Result<(), BrokerError> {
        declare_topology(self.broker.as_ref(), &Topology::for_producer(EXCHANGE)).await?;
        for service in self.services() {
            self.consumer(service).declare().await?;
        }
        Ok(())
    }

    pub fn handler(&self, service: Service) -> Arc<dyn MessageHandler> {
        let ledger = self.stores.ledger.clone();
        match service {
            Service::Inventory => Arc::new(InventoryHandler::new(
                self.stores.stock.clone(),
                ledger,
                self.publisher.clone(),
            )),
            Service::Payment => Arc::new(PaymentHandler::new(
                self.gateway.clone(),
                ledger,
                self.publisher.clone(),
            )),
            Service::OrderStatus => Arc::new(OrderStatusHandler::new(self.stores.orders.clone())),
            Service::Notification => {
                Arc::new(NotificationHandler::new(self.notifier.clone(), ledger))
            }
            Service::Analytics => Arc::new(AnalyticsHandler::new(self.stores.analytics.clone(), ledger)),
        }
    }

    pub fn consumer(&self, service: Service) -> Consumer<Arc<dyn MessageHandler>> {
        let config = ConsumerConfig::for_service(service)
            .with_retry(self.config.retry)
            .with_poll_wait(self.config.poll_wait);
        Consumer::new(self.broker.clone(), self.handler(service), config)
            .with_health(self.health.clone())
    }

    /// Starts one task per enabled service. Each task stops once `shutdown`
    /// turns true, after finishing the message it is processing.
    pub fn spawn_consumers(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<(Service, JoinHandle<()>)> {
        self.services()
            .map(|service| {
                let consumer = self.consumer(service);
                let shutdown = shutdown.clone();
                let handle = tokio::spawn(async move { consumer.run(shutdown).await });
                (service, handle)
            })
            .collect()
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            producer: OrderProducer::new(self.stores.orders.clone(), self.publisher.clone()),
            orders: self.stores.orders.clone(),
            analytics: self.stores.analytics.clone(),
            consumers: self.health.clone(),
        })
    }
}
