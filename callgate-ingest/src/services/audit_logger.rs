//! Security audit trail
//!
//! Every admission outcome is recorded once: persisted to the
//! `security_audit_events` table and mirrored to tracing under the
//! `security_audit` target.

use async_trait::async_trait;
use callgate_common::Result;
use sqlx::SqlitePool;

use crate::db;
use crate::models::{AuditEventType, SecurityAuditEvent};

/// Append-only sink for security events
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn record(&self, event: SecurityAuditEvent) -> Result<()>;
}

/// Audit logger writing to SQLite
pub struct SqliteAuditLogger {
    db: SqlitePool,
}

impl SqliteAuditLogger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditLogger for SqliteAuditLogger {
    async fn record(&self, event: SecurityAuditEvent) -> Result<()> {
        match event.event_type {
            AuditEventType::Success => tracing::info!(
                target: "security_audit",
                event_id = %event.event_id,
                event_type = %event.event_type,
                tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
                source_ip = event.source_ip.as_deref().unwrap_or("-"),
                "Webhook admitted"
            ),
            _ => tracing::warn!(
                target: "security_audit",
                event_id = %event.event_id,
                event_type = %event.event_type,
                tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
                source_ip = event.source_ip.as_deref().unwrap_or("-"),
                "Webhook rejected"
            ),
        }

        db::audit::insert_event(&self.db, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_persisted_in_order() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let logger = SqliteAuditLogger::new(pool.clone());

        logger
            .record(SecurityAuditEvent::new(
                AuditEventType::MissingSignature,
                None,
                Some("10.0.0.1".to_string()),
                json!({"reason": "no header"}),
            ))
            .await
            .unwrap();
        logger
            .record(SecurityAuditEvent::new(
                AuditEventType::Success,
                Some("t-1".to_string()),
                None,
                json!({"call_id": "c-1"}),
            ))
            .await
            .unwrap();

        let events = db::audit::list_events(&pool, None, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::Success);
        assert_eq!(events[1].event_type, AuditEventType::MissingSignature);
        assert_eq!(events[1].source_ip.as_deref(), Some("10.0.0.1"));

        let scoped = db::audit::list_events(&pool, Some("t-1"), 10).await.unwrap();
        assert_eq!(scoped.len(), 1);
    }
}
