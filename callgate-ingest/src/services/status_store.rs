//! Ingestion status store
//!
//! Durable `IngestionRecord` storage keyed by `(tenant_id, ingestion_id)`,
//! with `(tenant_id, call_id)` as the idempotency key. Every read is scoped
//! to a tenant.

use async_trait::async_trait;
use callgate_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::models::IngestionRecord;

/// Result of claiming an idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The record was stored; the caller owns this ingestion
    Created,
    /// Another delivery already holds the key
    Existing(IngestionRecord),
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write the current state of a record
    async fn save(&self, record: &IngestionRecord) -> Result<()>;

    async fn get_by_id(&self, tenant_id: &str, ingestion_id: Uuid) -> Result<Option<IngestionRecord>>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        call_id: &str,
    ) -> Result<Option<IngestionRecord>>;

    /// Atomically store `record` unless its idempotency key is taken
    async fn claim(&self, record: &IngestionRecord) -> Result<ClaimOutcome>;
}

/// SQLite-backed status store
pub struct SqliteStatusStore {
    db: SqlitePool,
}

impl SqliteStatusStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn save(&self, record: &IngestionRecord) -> Result<()> {
        match db::ingestions::update_record(&self.db, record).await {
            Err(Error::NotFound(_)) => {
                if db::ingestions::insert_if_absent(&self.db, record).await? {
                    Ok(())
                } else {
                    Err(Error::InvalidInput(format!(
                        "Call {} already has a different ingestion",
                        record.call_id
                    )))
                }
            }
            other => other,
        }
    }

    async fn get_by_id(&self, tenant_id: &str, ingestion_id: Uuid) -> Result<Option<IngestionRecord>> {
        db::ingestions::load_record(&self.db, tenant_id, ingestion_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        call_id: &str,
    ) -> Result<Option<IngestionRecord>> {
        db::ingestions::find_by_call_id(&self.db, tenant_id, call_id).await
    }

    async fn claim(&self, record: &IngestionRecord) -> Result<ClaimOutcome> {
        if db::ingestions::insert_if_absent(&self.db, record).await? {
            return Ok(ClaimOutcome::Created);
        }

        db::ingestions::find_by_call_id(&self.db, &record.tenant_id, &record.call_id)
            .await?
            .map(ClaimOutcome::Existing)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "Idempotency key ({}, {}) conflicted but no record found",
                    record.tenant_id, record.call_id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IngestionStage;

    #[tokio::test]
    async fn test_claim_is_first_writer_wins() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let store = SqliteStatusStore::new(pool);

        let first = IngestionRecord::new("t-1", "call-1");
        let second = IngestionRecord::new("t-1", "call-1");

        assert_eq!(store.claim(&first).await.unwrap(), ClaimOutcome::Created);
        match store.claim(&second).await.unwrap() {
            ClaimOutcome::Existing(existing) => assert_eq!(existing.ingestion_id, first.ingestion_id),
            ClaimOutcome::Created => panic!("duplicate claim succeeded"),
        }
    }

    #[tokio::test]
    async fn test_save_updates_claimed_record() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let store = SqliteStatusStore::new(pool);

        let mut record = IngestionRecord::new("t-1", "call-1");
        store.claim(&record).await.unwrap();
        record.transition_to(IngestionStage::DownloadingAudio).unwrap();
        store.save(&record).await.unwrap();

        let loaded = store.get_by_id("t-1", record.ingestion_id).await.unwrap().unwrap();
        assert_eq!(loaded.stage, IngestionStage::DownloadingAudio);
        assert!(store.get_by_id("t-2", record.ingestion_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_inserts_unclaimed_record() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let store = SqliteStatusStore::new(pool);

        let record = IngestionRecord::new("t-1", "call-9");
        store.save(&record).await.unwrap();
        assert!(store.find_by_idempotency_key("t-1", "call-9").await.unwrap().is_some());

        // Same key, different ingestion id
        let clash = IngestionRecord::new("t-1", "call-9");
        assert!(store.save(&clash).await.is_err());
    }
}
