//! Production collaborators
//!
//! HTTP clients for audio download, transcription, extraction and CRM lead
//! creation, plus the SQLite document persister.
//!
//! Wire contracts:
//! - Transcription: `POST <url>` with the raw audio (`application/octet-stream`),
//!   response `{"transcript": "...", "confidence": 0.93}`
//! - Extraction: `POST <url>` with `{"transcript", "rules"}`, response
//!   `{"data": {...}, "confidence": 0.88}`
//! - CRM: `POST crm_config.endpoint` with the lead JSON, bearer
//!   `crm_config.api_key` if present, response `{"lead_id": "..."}` (or `"id"`)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::db;
use crate::models::IngestionDocument;
use crate::services::collaborators::{
    normalize_confidence, AudioFetcher, CollaboratorError, CrmClient, Extraction, Extractor,
    LeadData, RecordPersister, StageContext, Transcriber, Transcript,
};

const USER_AGENT: &str = concat!("callgate/", env!("CARGO_PKG_VERSION"));
const INGESTION_ID_HEADER: &str = "X-Ingestion-Id";

/// Shared HTTP client for all collaborators
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, CollaboratorError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Map a non-success status to the matching error
fn check_status(service: &str, status: reqwest::StatusCode) -> Result<(), CollaboratorError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(CollaboratorError::Unavailable(format!("{} returned {}", service, status)))
    } else {
        Err(CollaboratorError::Rejected(format!("{} returned {}", service, status)))
    }
}

/// Downloads call recordings, bounded by `max_bytes`
pub struct HttpAudioFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpAudioFetcher {
    pub fn new(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, recording_url: &str, ctx: &StageContext) -> Result<Vec<u8>, CollaboratorError> {
        let mut response = self
            .client
            .get(recording_url)
            .header(INGESTION_ID_HEADER, ctx.ingestion_id.to_string())
            .send()
            .await?;
        check_status("Recording host", response.status())?;

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(CollaboratorError::Rejected(format!(
                    "Recording is {} bytes, limit is {}",
                    len, self.max_bytes
                )));
            }
        }

        // Content-Length may be absent or wrong; enforce the limit while streaming
        let mut audio = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if audio.len() + chunk.len() > self.max_bytes {
                return Err(CollaboratorError::Rejected(format!(
                    "Recording exceeds {} bytes",
                    self.max_bytes
                )));
            }
            audio.extend_from_slice(&chunk);
        }

        if audio.is_empty() {
            return Err(CollaboratorError::InvalidResponse("Recording is empty".to_string()));
        }

        tracing::debug!(
            ingestion_id = %ctx.ingestion_id,
            bytes = audio.len(),
            "Recording downloaded"
        );
        Ok(audio)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// Speech-to-text over HTTP
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8], ctx: &StageContext) -> Result<Transcript, CollaboratorError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            CollaboratorError::Unavailable("Transcription endpoint not configured".to_string())
        })?;

        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(INGESTION_ID_HEADER, ctx.ingestion_id.to_string())
            .body(audio.to_vec())
            .send()
            .await?;
        check_status("Transcription service", response.status())?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        Ok(Transcript {
            text: body.transcript,
            confidence: normalize_confidence(body.confidence),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    data: Value,
    confidence: f64,
}

/// Structured extraction over HTTP
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpExtractor {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        transcript: &str,
        rules: &Value,
        ctx: &StageContext,
    ) -> Result<Extraction, CollaboratorError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            CollaboratorError::Unavailable("Extraction endpoint not configured".to_string())
        })?;

        let response = self
            .client
            .post(endpoint)
            .header(INGESTION_ID_HEADER, ctx.ingestion_id.to_string())
            .json(&json!({ "transcript": transcript, "rules": rules }))
            .send()
            .await?;
        check_status("Extraction service", response.status())?;

        let body: ExtractionResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        Ok(Extraction {
            data: body.data,
            confidence: normalize_confidence(body.confidence),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LeadResponse {
    #[serde(alias = "id")]
    lead_id: Value,
}

/// CRM lead creation; the target comes from each tenant's `crm_config`
pub struct HttpCrmClient {
    client: reqwest::Client,
}

impl HttpCrmClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn create_lead(
        &self,
        lead: &LeadData,
        crm_config: &Value,
        ctx: &StageContext,
    ) -> Result<String, CollaboratorError> {
        let endpoint = crm_config
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| CollaboratorError::Rejected("crm_config.endpoint missing".to_string()))?;

        let mut request = self
            .client
            .post(endpoint)
            .header(INGESTION_ID_HEADER, ctx.ingestion_id.to_string())
            .json(lead);
        if let Some(api_key) = crm_config.get("api_key").and_then(Value::as_str) {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        check_status("CRM", response.status())?;

        let body: LeadResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        match body.lead_id {
            Value::String(id) if !id.is_empty() => Ok(id),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(CollaboratorError::InvalidResponse(format!(
                "Unusable lead id: {}",
                other
            ))),
        }
    }
}

/// Writes transcripts and extraction results to the local database
pub struct SqlitePersister {
    db: SqlitePool,
}

impl SqlitePersister {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordPersister for SqlitePersister {
    async fn save(&self, document: &IngestionDocument, _ctx: &StageContext) -> Result<(), CollaboratorError> {
        db::documents::save_document(&self.db, document).await?;
        Ok(())
    }
}
