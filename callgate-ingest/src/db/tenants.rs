//! Tenant database operations
//!
//! Tenants are administered externally; the pipeline only reads them. The
//! write helpers exist for the administration process and for tests.

use callgate_common::{Error, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{SecurityLevel, Tenant, WebhookSecret};

const TENANT_COLUMNS: &str = r#"
    tenant_id, external_company_id, is_active, webhook_secret, rate_limit_per_minute,
    crm_config, processing_rules, min_confidence_for_crm, security_level
"#;

/// Insert or replace a tenant
pub async fn upsert_tenant(pool: &SqlitePool, tenant: &Tenant) -> Result<()> {
    let crm_config = serde_json::to_string(&tenant.crm_config)?;
    let processing_rules = serde_json::to_string(&tenant.processing_rules)?;
    let secret = String::from_utf8(tenant.webhook_secret.expose().to_vec())
        .map_err(|e| Error::InvalidInput(format!("webhook secret is not UTF-8: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO tenants (
            tenant_id, external_company_id, is_active, webhook_secret, rate_limit_per_minute,
            crm_config, processing_rules, min_confidence_for_crm, security_level, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tenant_id) DO UPDATE SET
            external_company_id = excluded.external_company_id,
            is_active = excluded.is_active,
            webhook_secret = excluded.webhook_secret,
            rate_limit_per_minute = excluded.rate_limit_per_minute,
            crm_config = excluded.crm_config,
            processing_rules = excluded.processing_rules,
            min_confidence_for_crm = excluded.min_confidence_for_crm,
            security_level = excluded.security_level,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&tenant.tenant_id)
    .bind(&tenant.external_company_id)
    .bind(tenant.is_active)
    .bind(secret)
    .bind(i64::from(tenant.rate_limit_per_minute))
    .bind(crm_config)
    .bind(processing_rules)
    .bind(tenant.min_confidence_for_crm)
    .bind(tenant.security_level.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Activate or deactivate a tenant; returns false if the tenant doesn't exist
pub async fn set_tenant_active(pool: &SqlitePool, tenant_id: &str, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE tenants SET is_active = ?, updated_at = ? WHERE tenant_id = ?")
        .bind(active)
        .bind(Utc::now().to_rfc3339())
        .bind(tenant_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Look up the tenant owning an external company id
///
/// An active tenant wins over inactive ones sharing the same company id.
pub async fn find_by_company_id(pool: &SqlitePool, company_id: &str) -> Result<Option<Tenant>> {
    let sql = format!(
        "SELECT {} FROM tenants WHERE external_company_id = ? ORDER BY is_active DESC LIMIT 1",
        TENANT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(company_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_tenant).transpose()
}

/// Load a tenant by internal id
pub async fn load_tenant(pool: &SqlitePool, tenant_id: &str) -> Result<Option<Tenant>> {
    let sql = format!("SELECT {} FROM tenants WHERE tenant_id = ?", TENANT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_tenant).transpose()
}

/// Current activity flag; unknown tenants are inactive
pub async fn is_active(pool: &SqlitePool, tenant_id: &str) -> Result<bool> {
    let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM tenants WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

    Ok(active.unwrap_or(false))
}

fn row_to_tenant(row: &SqliteRow) -> Result<Tenant> {
    let crm_config: String = row.try_get("crm_config")?;
    let processing_rules: String = row.try_get("processing_rules")?;
    let security_level: String = row.try_get("security_level")?;
    let rate_limit: i64 = row.try_get("rate_limit_per_minute")?;

    Ok(Tenant {
        tenant_id: row.try_get("tenant_id")?,
        external_company_id: row.try_get("external_company_id")?,
        is_active: row.try_get("is_active")?,
        webhook_secret: WebhookSecret::new(row.try_get::<String, _>("webhook_secret")?),
        rate_limit_per_minute: u32::try_from(rate_limit.max(0)).unwrap_or(u32::MAX),
        crm_config: serde_json::from_str(&crm_config)?,
        processing_rules: serde_json::from_str(&processing_rules)?,
        min_confidence_for_crm: row.try_get("min_confidence_for_crm")?,
        security_level: security_level
            .parse::<SecurityLevel>()
            .map_err(Error::Internal)?,
    })
}
