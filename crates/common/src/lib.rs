//! Identifier types shared by every service taking part in order fulfillment.

pub mod types;

pub use types::{CorrelationId, OrderId, Sku};
