use async_trait::async_trait;
use common::{CorrelationId, OrderId, Sku};
use events::OrderStatus;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{NewOrder, OrderRecord, OrderStatusStore};
use crate::error::StoreError;

/// PostgreSQL-backed order store over the `orders` table.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord, StoreError> {
        let status: String = row.try_get("status")?;
        let quantity: i32 = row.try_get("quantity")?;

        Ok(OrderRecord {
            id: OrderId::new(row.try_get("id")?),
            customer_name: row.try_get("customer_name")?,
            product: Sku::new(row.try_get::<String, _>("product")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidData(format!("negative quantity {quantity}")))?,
            status: OrderStatus::parse(&status)
                .ok_or_else(|| StoreError::InvalidData(format!("unknown status '{status}'")))?,
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderStatusStore for PostgresOrderStore {
    async fn create(
        &self,
        order: &NewOrder,
        correlation_id: CorrelationId,
    ) -> Result<OrderRecord, StoreError> {
        let quantity = i32::try_from(order.quantity).map_err(|_| {
            StoreError::InvalidData(format!("quantity {} out of range", order.quantity))
        })?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (customer_name, product, quantity, status, correlation_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, customer_name, product, quantity, status, correlation_id, created_at, updated_at
            "#,
        )
        .bind(order.customer_name.as_deref())
        .bind(order.product.as_str())
        .bind(quantity)
        .bind(OrderStatus::Created.as_str())
        .bind(correlation_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_order(row)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                updated_at = CASE WHEN status = $2 THEN updated_at ELSE NOW() END
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_name, product, quantity, status, correlation_id, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self) -> Result<Vec<OrderRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_name, product, quantity, status, correlation_id, created_at, updated_at
            FROM orders
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}
