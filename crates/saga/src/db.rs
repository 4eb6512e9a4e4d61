//! Database setup shared by the Postgres stores.

use sqlx::PgPool;

use crate::error::StoreError;

/// Applies the schema for orders, inventory, analytics and the idempotency ledger.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
