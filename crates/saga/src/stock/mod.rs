//! Stock levels and atomic reservation.

mod memory;
mod postgres;

use async_trait::async_trait;
use common::Sku;

use crate::error::StoreError;

pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Stock per SKU.
///
/// `reserve` is a compare-and-decrement: concurrent reservations for the same
/// SKU never take stock below zero, and a failed reservation leaves stock
/// untouched.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Takes `quantity` units of `sku` if at least that many are available.
    ///
    /// Returns false for an unknown SKU or insufficient stock.
    async fn reserve(&self, sku: &Sku, quantity: u32) -> Result<bool, StoreError>;

    /// Returns `quantity` units of `sku` taken by an earlier reservation.
    ///
    /// An unknown SKU is left alone.
    async fn release(&self, sku: &Sku, quantity: u32) -> Result<(), StoreError>;

    /// Sets the stock of `sku`, creating the item if needed.
    async fn set_stock(&self, sku: &Sku, quantity: u32) -> Result<(), StoreError>;

    /// Current stock of `sku`, or `None` if the SKU is unknown.
    async fn available(&self, sku: &Sku) -> Result<Option<u32>, StoreError>;
}
