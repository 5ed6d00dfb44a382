//! Pool construction and readiness probes.

use crate::config::DatabaseConfig;
use crate::error::ParleyError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Tables the server reads or writes. Provisioning happens elsewhere.
pub const REQUIRED_TABLES: &[&str] = &[
    "organizations",
    "accounts",
    "contacts",
    "conversations",
    "messages",
    "knowledge_sources",
    "knowledge_chunks",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await
}

/// Server version string, e.g. `PostgreSQL 16.2 on x86_64-pc-linux-gnu ...`.
pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    sqlx::query_scalar("SELECT version()").fetch_one(pool).await
}

/// Installed pgvector version. Nearest-neighbour retrieval needs it, so a
/// missing extension is reported as an error rather than an empty string.
pub async fn check_pgvector(pool: &PgPool) -> Result<String, ParleyError> {
    let version: Option<String> =
        sqlx::query_scalar("SELECT extversion FROM pg_extension WHERE extname = $1")
            .bind("vector")
            .fetch_optional(pool)
            .await?;
    version.ok_or_else(|| ParleyError::Other("pgvector extension is not installed".to_string()))
}

/// Entries of `REQUIRED_TABLES` absent from the current schema.
pub async fn missing_tables(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let present: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables
         WHERE table_schema = current_schema() AND table_name = ANY($1)",
    )
    .bind(REQUIRED_TABLES)
    .fetch_all(pool)
    .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect())
}
