use async_trait::async_trait;
use chrono::Utc;
use common::{CorrelationId, OrderId};
use events::{EventEnvelope, OrderStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{AnalyticsCounters, AnalyticsEvent, AnalyticsStore};
use crate::error::StoreError;

/// PostgreSQL-backed analytics over the `order_events` and
/// `analytics_metrics` tables.
///
/// An event row and its counter increments are written in one transaction.
#[derive(Clone)]
pub struct PostgresAnalyticsStore {
    pool: PgPool,
}

impl PostgresAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: PgRow) -> Result<AnalyticsEvent, StoreError> {
        let status: String = row.try_get("status")?;
        let correlation_id = row
            .try_get::<Option<String>, _>("correlation_id")?
            .map(|raw| {
                Uuid::parse_str(&raw).map(CorrelationId::from_uuid).map_err(|e| {
                    StoreError::InvalidData(format!("bad correlation id '{raw}': {e}"))
                })
            })
            .transpose()?;

        Ok(AnalyticsEvent {
            order_id: OrderId::new(row.try_get("order_id")?),
            event_type: row.try_get("event_type")?,
            status: OrderStatus::parse(&status)
                .ok_or_else(|| StoreError::InvalidData(format!("unknown status '{status}'")))?,
            correlation_id,
            recorded_at: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl AnalyticsStore for PostgresAnalyticsStore {
    async fn record(&self, envelope: &EventEnvelope) -> Result<(), StoreError> {
        let event = AnalyticsEvent::observed(envelope, Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO order_events (order_id, event_type, status, correlation_id, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.order_id.as_i64())
        .bind(&event.event_type)
        .bind(event.status.as_str())
        .bind(event.correlation_id.map(|c| c.to_string()))
        .bind(event.recorded_at)
        .execute(&mut *tx)
        .await?;

        for metric in AnalyticsCounters::metrics_for(&envelope.event) {
            sqlx::query(
                r#"
                INSERT INTO analytics_metrics (metric_name, metric_value)
                VALUES ($1, 1)
                ON CONFLICT (metric_name) DO UPDATE
                SET metric_value = analytics_metrics.metric_value + 1, updated_at = NOW()
                "#,
            )
            .bind(*metric)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn counters(&self) -> Result<AnalyticsCounters, StoreError> {
        let rows = sqlx::query("SELECT metric_name, metric_value FROM analytics_metrics")
            .fetch_all(&self.pool)
            .await?;

        let mut counters = AnalyticsCounters::default();
        for row in rows {
            let name: String = row.try_get("metric_name")?;
            let value: f64 = row.try_get("metric_value")?;
            counters.set(&name, value.max(0.0) as u64);
        }
        Ok(counters)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AnalyticsEvent>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT order_id, event_type, status, correlation_id, timestamp
            FROM order_events
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn trace(&self, order_id: OrderId) -> Result<Vec<AnalyticsEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, event_type, status, correlation_id, timestamp
            FROM order_events
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}
