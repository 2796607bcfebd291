//! Database access for callgate-ingest
//!
//! SQLite via sqlx. Every ingestion query binds `tenant_id`; no query reads
//! or writes ingestion rows across tenants.

pub mod audit;
pub mod documents;
pub mod ingestions;
pub mod tenants;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the database file if missing and ensures all tables exist.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// One connection keeps every query on the same in-memory database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create callgate tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            tenant_id TEXT PRIMARY KEY,
            external_company_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            webhook_secret TEXT NOT NULL,
            rate_limit_per_minute INTEGER NOT NULL,
            crm_config TEXT NOT NULL DEFAULT 'null',
            processing_rules TEXT NOT NULL DEFAULT 'null',
            min_confidence_for_crm REAL NOT NULL DEFAULT 0.8,
            security_level TEXT NOT NULL DEFAULT 'standard',
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // external_company_id is unique among active tenants only
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_active_company
        ON tenants (external_company_id) WHERE is_active = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestions (
            ingestion_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            call_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            stage_history TEXT NOT NULL DEFAULT '[]',
            extracted_data TEXT,
            confidence REAL,
            crm_lead_id TEXT,
            final_status TEXT,
            failure TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (tenant_id, call_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_documents (
            ingestion_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            call_id TEXT NOT NULL,
            transcript TEXT NOT NULL,
            transcription_confidence REAL NOT NULL,
            extracted_data TEXT NOT NULL,
            confidence REAL NOT NULL,
            stored_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS security_audit_events (
            event_id TEXT PRIMARY KEY,
            tenant_id TEXT,
            event_type TEXT NOT NULL,
            source_ip TEXT,
            timestamp TEXT NOT NULL,
            sanitized_details TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (tenants, ingestions, ingestion_documents, security_audit_events)"
    );

    Ok(())
}

/// Parse an RFC 3339 column value
pub(crate) fn parse_timestamp(column: &str, value: &str) -> callgate_common::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| callgate_common::Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
