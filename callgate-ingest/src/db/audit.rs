//! Security audit event storage
//!
//! Append-only: there is no update or delete path.

use callgate_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::parse_timestamp;
use crate::models::{AuditEventType, SecurityAuditEvent};

/// Append one audit event
pub async fn insert_event(pool: &SqlitePool, event: &SecurityAuditEvent) -> Result<()> {
    let details = serde_json::to_string(&event.sanitized_details)?;

    sqlx::query(
        r#"
        INSERT INTO security_audit_events (
            event_id, tenant_id, event_type, source_ip, timestamp, sanitized_details
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.event_id.to_string())
    .bind(&event.tenant_id)
    .bind(event.event_type.as_str())
    .bind(&event.source_ip)
    .bind(event.timestamp.to_rfc3339())
    .bind(details)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent events first, optionally limited to one tenant
pub async fn list_events(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
    limit: i64,
) -> Result<Vec<SecurityAuditEvent>> {
    let rows = match tenant_id {
        Some(tenant_id) => {
            sqlx::query(
                r#"
                SELECT event_id, tenant_id, event_type, source_ip, timestamp, sanitized_details
                FROM security_audit_events
                WHERE tenant_id = ?
                ORDER BY rowid DESC
                LIMIT ?
                "#,
            )
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT event_id, tenant_id, event_type, source_ip, timestamp, sanitized_details
                FROM security_audit_events
                ORDER BY rowid DESC
                LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(row_to_event).collect()
}

/// Count events of one type
pub async fn count_by_type(pool: &SqlitePool, event_type: AuditEventType) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM security_audit_events WHERE event_type = ?")
            .bind(event_type.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

fn row_to_event(row: &SqliteRow) -> Result<SecurityAuditEvent> {
    let event_id: String = row.try_get("event_id")?;
    let event_type: String = row.try_get("event_type")?;
    let timestamp: String = row.try_get("timestamp")?;
    let details: String = row.try_get("sanitized_details")?;

    Ok(SecurityAuditEvent {
        event_id: Uuid::parse_str(&event_id)
            .map_err(|e| Error::Internal(format!("Failed to parse event_id: {}", e)))?,
        tenant_id: row.try_get("tenant_id")?,
        event_type: event_type.parse().map_err(Error::Internal)?,
        source_ip: row.try_get("source_ip")?,
        timestamp: parse_timestamp("timestamp", &timestamp)?,
        sanitized_details: serde_json::from_str(&details)?,
    })
}
