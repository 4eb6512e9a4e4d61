use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{IdempotencyLedger, MarkOutcome, ProcessedMessageRecord, Result, count_duplicate};

const UNIQUE_CONSTRAINT: &str = "uq_processed_messages_service_key";

/// PostgreSQL-backed ledger over the `processed_messages` table.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: PgRow) -> Result<ProcessedMessageRecord> {
        Ok(ProcessedMessageRecord {
            service: row.try_get("service")?,
            business_key: row.try_get("business_key")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

#[async_trait]
impl IdempotencyLedger for PostgresLedger {
    async fn already_processed(&self, service: &str, business_key: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_messages WHERE service = $1 AND business_key = $2)",
        )
        .bind(service)
        .bind(business_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_processed(&self, service: &str, business_key: &str) -> Result<MarkOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_messages (service, business_key, processed_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(service)
        .bind(business_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(MarkOutcome::Recorded),
            Err(sqlx::Error::Database(ref db_err))
                if db_err.constraint() == Some(UNIQUE_CONSTRAINT) =>
            {
                tracing::debug!(%service, %business_key, "lost mark race, already processed");
                count_duplicate(service);
                Ok(MarkOutcome::AlreadyProcessed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record(
        &self,
        service: &str,
        business_key: &str,
    ) -> Result<Option<ProcessedMessageRecord>> {
        let row = sqlx::query(
            r#"
            SELECT service, business_key, processed_at
            FROM processed_messages
            WHERE service = $1 AND business_key = $2
            "#,
        )
        .bind(service)
        .bind(business_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}
