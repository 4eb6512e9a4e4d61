use async_trait::async_trait;
use common::Sku;
use sqlx::PgPool;

use super::StockStore;
use crate::error::StoreError;

/// PostgreSQL-backed stock over the `inventory_items` table.
///
/// Reservation is a single conditional `UPDATE`, so the row lock taken by
/// the update serializes concurrent reservations of the same SKU.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_db_quantity(quantity: u32) -> Result<i32, StoreError> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::InvalidData(format!("quantity {quantity} out of range")))
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn reserve(&self, sku: &Sku, quantity: u32) -> Result<bool, StoreError> {
        // More than any row can hold.
        let Ok(quantity) = i32::try_from(quantity) else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET quantity = quantity - $2, updated_at = NOW()
            WHERE sku = $1 AND quantity >= $2
            "#,
        )
        .bind(sku.as_str())
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, sku: &Sku, quantity: u32) -> Result<(), StoreError> {
        let released = sqlx::query(
            r#"
            UPDATE inventory_items
            SET quantity = quantity + $2, updated_at = NOW()
            WHERE sku = $1
            "#,
        )
        .bind(sku.as_str())
        .bind(to_db_quantity(quantity)?)
        .execute(&self.pool)
        .await?;

        if released.rows_affected() == 0 {
            tracing::warn!(%sku, quantity, "release for unknown sku ignored");
        }
        Ok(())
    }

    async fn set_stock(&self, sku: &Sku, quantity: u32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_items (sku, name, quantity)
            VALUES ($1, $1, $2)
            ON CONFLICT (sku) DO UPDATE
            SET quantity = EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(sku.as_str())
        .bind(to_db_quantity(quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn available(&self, sku: &Sku) -> Result<Option<u32>, StoreError> {
        let quantity: Option<i32> =
            sqlx::query_scalar("SELECT quantity FROM inventory_items WHERE sku = $1")
                .bind(sku.as_str())
                .fetch_optional(&self.pool)
                .await?;

        quantity
            .map(|q| {
                u32::try_from(q)
                    .map_err(|_| StoreError::InvalidData(format!("negative stock {q} for {sku}")))
            })
            .transpose()
    }
}
