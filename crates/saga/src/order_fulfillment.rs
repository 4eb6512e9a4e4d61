//! Order fulfillment choreography wiring: services, their queues and bindings.

use std::str::FromStr;

use events::RoutingKey;

/// The consuming services of the choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Inventory,
    Payment,
    OrderStatus,
    Notification,
    Analytics,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Inventory,
        Service::Payment,
        Service::OrderStatus,
        Service::Notification,
        Service::Analytics,
    ];

    /// Name used in logs, metrics and as the idempotency ledger scope.
    pub fn name(&self) -> &'static str {
        match self {
            Service::Inventory => "inventory",
            Service::Payment => "payment",
            Service::OrderStatus => "order-status",
            Service::Notification => "notification",
            Service::Analytics => "analytics",
        }
    }

    /// The service's durable queue on the orders exchange.
    pub fn queue(&self) -> &'static str {
        match self {
            Service::Inventory => "inventory.queue",
            Service::Payment => "payment.queue",
            Service::OrderStatus => "order.update.queue",
            Service::Notification => "notification.queue",
            Service::Analytics => "analytics.queue",
        }
    }

    /// Routing keys the service's queue is bound to.
    pub fn bindings(&self) -> &'static [RoutingKey] {
        match self {
            Service::Inventory => &[RoutingKey::OrderCreated],
            Service::Payment => &[RoutingKey::OrderValidated],
            Service::OrderStatus | Service::Notification => {
                &[RoutingKey::OrderConfirmed, RoutingKey::OrderRejected]
            }
            Service::Analytics => &RoutingKey::ALL,
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|service| service.name() == s.trim())
            .ok_or_else(|| format!("unknown service '{s}'"))
    }
}
