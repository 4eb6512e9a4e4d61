use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::Sku;
use tokio::sync::Mutex;

use super::StockStore;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct StockState {
    items: HashMap<Sku, u32>,
    unavailable: bool,
}

/// In-memory stock store. The check and the decrement happen under one lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<StockState>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store seeded with the given stock levels.
    pub fn with_stock<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<Sku>,
    {
        let items = items
            .into_iter()
            .map(|(sku, quantity)| (sku.into(), quantity))
            .collect();
        Self {
            state: Arc::new(Mutex::new(StockState {
                items,
                unavailable: false,
            })),
        }
    }

    /// Makes every operation fail until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }
}

fn check(state: &StockState) -> Result<(), StoreError> {
    if state.unavailable {
        Err(StoreError::Unavailable("stock store offline".to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn reserve(&self, sku: &Sku, quantity: u32) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        check(&state)?;

        match state.items.get_mut(sku) {
            Some(stock) if *stock >= quantity => {
                *stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, sku: &Sku, quantity: u32) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        check(&state)?;
        match state.items.get_mut(sku) {
            Some(stock) => *stock = stock.saturating_add(quantity),
            None => tracing::warn!(%sku, quantity, "release for unknown sku ignored"),
        }
        Ok(())
    }

    async fn set_stock(&self, sku: &Sku, quantity: u32) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        check(&state)?;
        state.items.insert(sku.clone(), quantity);
        Ok(())
    }

    async fn available(&self, sku: &Sku) -> Result<Option<u32>, StoreError> {
        let state = self.state.lock().await;
        check(&state)?;
        Ok(state.items.get(sku).copied())
    }
}
