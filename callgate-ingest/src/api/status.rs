//! Ingestion status endpoint
//!
//! GET /tenants/:tenant_id/ingestions/:ingestion_id
//!
//! The caller proves tenant ownership by signing the ingestion id (as its
//! hyphenated string) with the tenant's webhook secret, sent in the same
//! header as webhook signatures. An unknown tenant is indistinguishable from
//! a bad signature (401); a foreign or missing ingestion answers 404.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use callgate_common::signature::verify_signature;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{FinalStatus, IngestionRecord, IngestionStage, StageFailure},
    AppState,
};

const NOT_FOUND_MESSAGE: &str = "Ingestion not found";

/// One stage timing entry
#[derive(Debug, Serialize)]
pub struct StageTiming {
    pub stage: IngestionStage,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

/// GET /tenants/:tenant_id/ingestions/:ingestion_id response
#[derive(Debug, Serialize)]
pub struct IngestionStatusResponse {
    pub ingestion_id: Uuid,
    pub tenant_id: String,
    pub call_id: String,
    pub stage: IngestionStage,
    pub final_status: Option<FinalStatus>,
    pub extracted_data: Option<Value>,
    pub confidence: Option<f64>,
    pub crm_lead_id: Option<String>,
    pub failure: Option<StageFailure>,
    pub stage_history: Vec<StageTiming>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IngestionRecord> for IngestionStatusResponse {
    fn from(record: IngestionRecord) -> Self {
        let stage_history = record
            .stage_history
            .into_iter()
            .map(|entry| StageTiming {
                duration_ms: entry
                    .completed_at
                    .map(|done| (done - entry.started_at).num_milliseconds()),
                stage: entry.stage,
                started_at: entry.started_at,
                completed_at: entry.completed_at,
                error: entry.error,
            })
            .collect();

        Self {
            ingestion_id: record.ingestion_id,
            tenant_id: record.tenant_id,
            call_id: record.call_id,
            stage: record.stage,
            final_status: record.final_status,
            extracted_data: record.extracted_data,
            confidence: record.confidence,
            crm_lead_id: record.crm_lead_id,
            failure: record.failure,
            stage_history,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// GET /tenants/:tenant_id/ingestions/:ingestion_id
pub async fn get_ingestion_status(
    State(state): State<AppState>,
    Path((tenant_id, ingestion_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<IngestionStatusResponse>> {
    let ingestion_id = Uuid::parse_str(&ingestion_id)
        .map_err(|_| ApiError::NotFound(NOT_FOUND_MESSAGE.to_string()))?;

    let signature = headers
        .get(state.gatekeeper.signature_header())
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing signature".to_string()))?;

    let tenant = state
        .registry
        .get(&tenant_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid signature".to_string()))?;

    verify_signature(
        tenant.webhook_secret.expose(),
        ingestion_id.to_string().as_bytes(),
        signature,
    )
    .map_err(|_| ApiError::Unauthorized("Invalid signature".to_string()))?;

    let record = state
        .orchestrator
        .status(&tenant.tenant_id, ingestion_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND_MESSAGE.to_string()))?;

    Ok(Json(record.into()))
}

/// Build status routes
pub fn status_routes() -> Router<AppState> {
    Router::new().route(
        "/tenants/:tenant_id/ingestions/:ingestion_id",
        get(get_ingestion_status),
    )
}
