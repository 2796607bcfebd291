//! Ingestion record database operations
//!
//! Every statement is scoped by `tenant_id`.

use callgate_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::parse_timestamp;
use crate::models::{FinalStatus, IngestionRecord, IngestionStage, StageFailure, StageRecord};

const RECORD_COLUMNS: &str = r#"
    ingestion_id, tenant_id, call_id, stage, stage_history, extracted_data,
    confidence, crm_lead_id, final_status, failure, created_at, updated_at
"#;

/// Column values prepared before touching the pool
struct RecordColumns {
    ingestion_id: String,
    stage: &'static str,
    stage_history: String,
    extracted_data: Option<String>,
    final_status: Option<String>,
    failure: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RecordColumns {
    fn from_record(record: &IngestionRecord) -> Result<Self> {
        Ok(Self {
            ingestion_id: record.ingestion_id.to_string(),
            stage: record.stage.as_str(),
            stage_history: serde_json::to_string(&record.stage_history)?,
            extracted_data: record
                .extracted_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            final_status: record.final_status.map(|s| serde_json::to_string(&s)).transpose()?,
            failure: record.failure.as_ref().map(serde_json::to_string).transpose()?,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        })
    }
}

/// Insert `record` unless `(tenant_id, call_id)` already exists
///
/// Returns true when the row was inserted. The UNIQUE constraint makes this
/// atomic under concurrent duplicate deliveries.
pub async fn insert_if_absent(pool: &SqlitePool, record: &IngestionRecord) -> Result<bool> {
    let cols = RecordColumns::from_record(record)?;

    let result = sqlx::query(
        r#"
        INSERT INTO ingestions (
            ingestion_id, tenant_id, call_id, stage, stage_history, extracted_data,
            confidence, crm_lead_id, final_status, failure, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tenant_id, call_id) DO NOTHING
        "#,
    )
    .bind(&cols.ingestion_id)
    .bind(&record.tenant_id)
    .bind(&record.call_id)
    .bind(cols.stage)
    .bind(&cols.stage_history)
    .bind(&cols.extracted_data)
    .bind(record.confidence)
    .bind(&record.crm_lead_id)
    .bind(&cols.final_status)
    .bind(&cols.failure)
    .bind(&cols.created_at)
    .bind(&cols.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Write the current state of an existing record
///
/// Fails with `NotFound` when no row matches both `ingestion_id` and
/// `tenant_id`.
pub async fn update_record(pool: &SqlitePool, record: &IngestionRecord) -> Result<()> {
    let cols = RecordColumns::from_record(record)?;

    let result = sqlx::query(
        r#"
        UPDATE ingestions SET
            stage = ?,
            stage_history = ?,
            extracted_data = ?,
            confidence = ?,
            crm_lead_id = ?,
            final_status = ?,
            failure = ?,
            updated_at = ?
        WHERE ingestion_id = ? AND tenant_id = ?
        "#,
    )
    .bind(cols.stage)
    .bind(&cols.stage_history)
    .bind(&cols.extracted_data)
    .bind(record.confidence)
    .bind(&record.crm_lead_id)
    .bind(&cols.final_status)
    .bind(&cols.failure)
    .bind(&cols.updated_at)
    .bind(&cols.ingestion_id)
    .bind(&record.tenant_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "Ingestion {} for tenant {}",
            record.ingestion_id, record.tenant_id
        )));
    }
    Ok(())
}

/// Load a record by id, scoped to a tenant
pub async fn load_record(
    pool: &SqlitePool,
    tenant_id: &str,
    ingestion_id: Uuid,
) -> Result<Option<IngestionRecord>> {
    let sql = format!(
        "SELECT {} FROM ingestions WHERE tenant_id = ? AND ingestion_id = ?",
        RECORD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(tenant_id)
        .bind(ingestion_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Load a record by idempotency key
pub async fn find_by_call_id(
    pool: &SqlitePool,
    tenant_id: &str,
    call_id: &str,
) -> Result<Option<IngestionRecord>> {
    let sql = format!(
        "SELECT {} FROM ingestions WHERE tenant_id = ? AND call_id = ?",
        RECORD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(tenant_id)
        .bind(call_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Number of records held for a tenant
pub async fn count_for_tenant(pool: &SqlitePool, tenant_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingestions WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn row_to_record(row: &SqliteRow) -> Result<IngestionRecord> {
    let ingestion_id: String = row.try_get("ingestion_id")?;
    let ingestion_id = Uuid::parse_str(&ingestion_id)
        .map_err(|e| Error::Internal(format!("Failed to parse ingestion_id: {}", e)))?;

    let stage: String = row.try_get("stage")?;
    let stage = stage.parse::<IngestionStage>().map_err(Error::Internal)?;

    let stage_history: String = row.try_get("stage_history")?;
    let stage_history: Vec<StageRecord> = serde_json::from_str(&stage_history)?;

    let extracted_data: Option<String> = row.try_get("extracted_data")?;
    let extracted_data: Option<serde_json::Value> = extracted_data
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    let final_status: Option<String> = row.try_get("final_status")?;
    let final_status: Option<FinalStatus> = final_status
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    let failure: Option<String> = row.try_get("failure")?;
    let failure: Option<StageFailure> = failure.map(|s| serde_json::from_str(&s)).transpose()?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(IngestionRecord {
        ingestion_id,
        tenant_id: row.try_get("tenant_id")?,
        call_id: row.try_get("call_id")?,
        stage,
        stage_history,
        extracted_data,
        confidence: row.try_get("confidence")?,
        crm_lead_id: row.try_get("crm_lead_id")?,
        final_status,
        failure,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_load_roundtrip_preserves_history() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let mut record = IngestionRecord::new("t-1", "call-1");
        assert!(insert_if_absent(&pool, &record).await.unwrap());

        record.transition_to(IngestionStage::DownloadingAudio).unwrap();
        record
            .fail(StageFailure::new(PipelineErrorKind::Timeout, "stage deadline"))
            .unwrap();
        update_record(&pool, &record).await.unwrap();

        let loaded = load_record(&pool, "t-1", record.ingestion_id).await.unwrap().unwrap();
        assert_eq!(loaded.stage, IngestionStage::Failed);
        assert_eq!(loaded.final_status, Some(FinalStatus::Failed));
        assert_eq!(loaded.stage_history.len(), 3);
        assert_eq!(loaded.failure.unwrap().kind, PipelineErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_not_inserted() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let first = IngestionRecord::new("t-1", "call-1");
        let second = IngestionRecord::new("t-1", "call-1");

        assert!(insert_if_absent(&pool, &first).await.unwrap());
        assert!(!insert_if_absent(&pool, &second).await.unwrap());
        assert_eq!(count_for_tenant(&pool, "t-1").await.unwrap(), 1);

        let found = find_by_call_id(&pool, "t-1", "call-1").await.unwrap().unwrap();
        assert_eq!(found.ingestion_id, first.ingestion_id);
    }

    #[tokio::test]
    async fn test_same_call_id_different_tenants_independent() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        assert!(insert_if_absent(&pool, &IngestionRecord::new("t-1", "call-1")).await.unwrap());
        assert!(insert_if_absent(&pool, &IngestionRecord::new("t-2", "call-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_queries_never_cross_tenants() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let mut record = IngestionRecord::new("t-b", "call-1");
        record.extracted_data = Some(json!({"secret": "b-only"}));
        insert_if_absent(&pool, &record).await.unwrap();

        assert!(load_record(&pool, "t-a", record.ingestion_id).await.unwrap().is_none());
        assert!(find_by_call_id(&pool, "t-a", "call-1").await.unwrap().is_none());
        assert!(find_by_call_id(&pool, "t-a' OR '1'='1", "call-1").await.unwrap().is_none());

        // Update with the wrong tenant must not touch the row
        let mut forged = record.clone();
        forged.tenant_id = "t-a".to_string();
        assert!(matches!(update_record(&pool, &forged).await, Err(Error::NotFound(_))));
    }
}
