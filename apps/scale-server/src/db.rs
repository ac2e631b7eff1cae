use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS measurements (
        id BIGSERIAL PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL,
        device_ip TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        name TEXT NOT NULL,
        value INTEGER NOT NULL,
        raw_value INTEGER NOT NULL,
        is_nan BOOLEAN NOT NULL DEFAULT FALSE,
        "type" TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS measurements_name_ts_idx ON measurements (name, ts DESC)",
    "CREATE INDEX IF NOT EXISTS measurements_endpoint_name_idx ON measurements (endpoint, name)",
    "CREATE INDEX IF NOT EXISTS measurements_ts_idx ON measurements (ts DESC)",
];

pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(8))
        .connect_lazy(database_url)
        .context("Failed to create lazy database pool")
}

/// Creates the measurements table and its lookup indexes when missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to apply measurements schema")?;
    }
    Ok(())
}
