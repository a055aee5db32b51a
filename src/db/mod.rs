//! Database connection management

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Schema for the data flow table. Lease columns are managed only by the store.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS data_flows_tb (
    id                     TEXT PRIMARY KEY,
    source                 JSONB NOT NULL,
    destination            JSONB NOT NULL,
    callback_address       TEXT,
    transfer_type          JSONB NOT NULL,
    runtime_id             TEXT NOT NULL,
    participant_id         TEXT NOT NULL,
    asset_id               TEXT NOT NULL,
    agreement_id           TEXT NOT NULL,
    provision_requested    BOOLEAN NOT NULL DEFAULT FALSE,
    provision_complete     BOOLEAN NOT NULL DEFAULT FALSE,
    deprovision_requested  BOOLEAN NOT NULL DEFAULT FALSE,
    deprovision_complete   BOOLEAN NOT NULL DEFAULT FALSE,
    is_consumer            BOOLEAN NOT NULL DEFAULT FALSE,
    state                  SMALLINT NOT NULL,
    state_reason           TEXT,
    error_detail           TEXT,
    created_at             TIMESTAMPTZ NOT NULL,
    updated_at             TIMESTAMPTZ NOT NULL,
    lease_holder           TEXT,
    lease_token            TEXT,
    lease_expires_at       TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_data_flows_state_updated
    ON data_flows_tb (state, updated_at);

CREATE INDEX IF NOT EXISTS idx_data_flows_participant
    ON data_flows_tb (participant_id);
"#;

/// Create the data flow table and indexes if missing
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Apply [`SCHEMA`]
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        init_schema(&self.pool).await?;
        tracing::info!("data_flows_tb schema ready");
        Ok(())
    }
}
