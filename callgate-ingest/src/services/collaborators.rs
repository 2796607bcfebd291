//! External collaborators driven by the pipeline
//!
//! Audio fetch, transcription, extraction, persistence and CRM are opaque
//! services behind these traits. The orchestrator owns deadlines and
//! cancellation; implementations may additionally watch `StageContext::cancel`
//! to abort in-progress I/O early.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::IngestionDocument;

/// Per-stage call context
#[derive(Debug, Clone)]
pub struct StageContext {
    pub ingestion_id: Uuid,
    pub tenant_id: String,
    pub cancel: CancellationToken,
}

/// Collaborator failure
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Transport failure or 5xx; the collaborator may succeed later
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the input
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] callgate_common::Error),
}

/// Speech-to-text result
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
}

/// Structured extraction result
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub data: Value,
    pub confidence: f64,
}

/// Lead handed to the CRM collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadData {
    pub ingestion_id: Uuid,
    pub tenant_id: String,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    pub duration: u64,
    pub extracted_data: Value,
    pub confidence: f64,
    pub custom_fields: Map<String, Value>,
}

#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, recording_url: &str, ctx: &StageContext) -> Result<Vec<u8>, CollaboratorError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], ctx: &StageContext) -> Result<Transcript, CollaboratorError>;
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// `rules` is the tenant's opaque `processing_rules`
    async fn extract(
        &self,
        transcript: &str,
        rules: &Value,
        ctx: &StageContext,
    ) -> Result<Extraction, CollaboratorError>;
}

#[async_trait]
pub trait RecordPersister: Send + Sync {
    async fn save(&self, document: &IngestionDocument, ctx: &StageContext) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Create a lead and return the CRM's lead id
    async fn create_lead(
        &self,
        lead: &LeadData,
        crm_config: &Value,
        ctx: &StageContext,
    ) -> Result<String, CollaboratorError>;
}

/// The full set of collaborators one orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub audio: Arc<dyn AudioFetcher>,
    pub transcriber: Arc<dyn Transcriber>,
    pub extractor: Arc<dyn Extractor>,
    pub persister: Arc<dyn RecordPersister>,
    pub crm: Arc<dyn CrmClient>,
}

/// Clamp a collaborator-reported confidence into [0.0, 1.0]
///
/// NaN maps to 0.0 so it can never open the CRM gate.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.92), 0.92);
        assert_eq!(normalize_confidence(1.7), 1.0);
        assert_eq!(normalize_confidence(-0.2), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_lead_serialization_omits_missing_caller() {
        let lead = LeadData {
            ingestion_id: Uuid::nil(),
            tenant_id: "t-1".to_string(),
            call_id: "c-1".to_string(),
            caller_number: None,
            caller_name: None,
            duration: 42,
            extracted_data: serde_json::json!({"intent": "quote"}),
            confidence: 0.9,
            custom_fields: Map::new(),
        };
        let value = serde_json::to_value(&lead).unwrap();
        assert!(value.get("caller_number").is_none());
        assert_eq!(value["duration"], 42);
    }
}
