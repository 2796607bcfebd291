//! Persisted transcripts and extraction results

use callgate_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::IngestionDocument;

/// Store (or overwrite) the document for an ingestion
pub async fn save_document(pool: &SqlitePool, doc: &IngestionDocument) -> Result<()> {
    let extracted = serde_json::to_string(&doc.extracted_data)?;

    sqlx::query(
        r#"
        INSERT INTO ingestion_documents (
            ingestion_id, tenant_id, call_id, transcript, transcription_confidence,
            extracted_data, confidence, stored_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(ingestion_id) DO UPDATE SET
            transcript = excluded.transcript,
            transcription_confidence = excluded.transcription_confidence,
            extracted_data = excluded.extracted_data,
            confidence = excluded.confidence,
            stored_at = excluded.stored_at
        WHERE ingestion_documents.tenant_id = excluded.tenant_id
        "#,
    )
    .bind(doc.ingestion_id.to_string())
    .bind(&doc.tenant_id)
    .bind(&doc.call_id)
    .bind(&doc.transcript)
    .bind(doc.transcription_confidence)
    .bind(extracted)
    .bind(doc.confidence)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Transcript stored for an ingestion, scoped to a tenant
pub async fn load_transcript(
    pool: &SqlitePool,
    tenant_id: &str,
    ingestion_id: Uuid,
) -> Result<Option<String>> {
    let transcript: Option<String> = sqlx::query_scalar(
        "SELECT transcript FROM ingestion_documents WHERE tenant_id = ? AND ingestion_id = ?",
    )
    .bind(tenant_id)
    .bind(ingestion_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(transcript)
}
