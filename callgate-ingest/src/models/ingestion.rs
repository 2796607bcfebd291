//! Ingestion state machine
//!
//! An ingestion progresses through these stages:
//! RECEIVED → DOWNLOADING_AUDIO → TRANSCRIBING → EXTRACTING → PERSISTING →
//! INTEGRATING_CRM → COMPLETED
//!
//! Terminal states:
//! - `Completed` (also reached straight from `Persisting` when the CRM gate is closed)
//! - `CompletedWithCrmError` (only from `IntegratingCrm`)
//! - `Failed` (from any non-terminal stage)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    /// Accepted by the gatekeeper, not yet started
    Received,
    /// Fetching the call recording
    DownloadingAudio,
    /// Speech-to-text
    Transcribing,
    /// Structured data extraction from the transcript
    Extracting,
    /// Writing transcript and extracted data to durable storage
    Persisting,
    /// Creating a CRM lead
    IntegratingCrm,
    /// Finished successfully
    Completed,
    /// Finished, CRM lead creation failed
    CompletedWithCrmError,
    /// Finished with a fatal stage error
    Failed,
}

impl IngestionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStage::Received => "received",
            IngestionStage::DownloadingAudio => "downloading_audio",
            IngestionStage::Transcribing => "transcribing",
            IngestionStage::Extracting => "extracting",
            IngestionStage::Persisting => "persisting",
            IngestionStage::IntegratingCrm => "integrating_crm",
            IngestionStage::Completed => "completed",
            IngestionStage::CompletedWithCrmError => "completed_with_crm_error",
            IngestionStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestionStage::Completed | IngestionStage::CompletedWithCrmError | IngestionStage::Failed
        )
    }

    /// Next stage on the happy path
    pub fn successor(&self) -> Option<IngestionStage> {
        match self {
            IngestionStage::Received => Some(IngestionStage::DownloadingAudio),
            IngestionStage::DownloadingAudio => Some(IngestionStage::Transcribing),
            IngestionStage::Transcribing => Some(IngestionStage::Extracting),
            IngestionStage::Extracting => Some(IngestionStage::Persisting),
            IngestionStage::Persisting => Some(IngestionStage::IntegratingCrm),
            IngestionStage::IntegratingCrm => Some(IngestionStage::Completed),
            _ => None,
        }
    }

    /// Whether `next` is a legal transition from `self`
    pub fn can_transition_to(&self, next: IngestionStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == IngestionStage::Failed {
            return true;
        }
        if self.successor() == Some(next) {
            return true;
        }
        matches!(
            (self, next),
            // CRM gate closed
            (IngestionStage::Persisting, IngestionStage::Completed)
                | (IngestionStage::IntegratingCrm, IngestionStage::CompletedWithCrmError)
        )
    }

    /// Final status for terminal stages
    pub fn final_status(&self) -> Option<FinalStatus> {
        match self {
            IngestionStage::Completed => Some(FinalStatus::Processed),
            IngestionStage::CompletedWithCrmError => Some(FinalStatus::ProcessedWithCrmError),
            IngestionStage::Failed => Some(FinalStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(IngestionStage::Received),
            "downloading_audio" => Ok(IngestionStage::DownloadingAudio),
            "transcribing" => Ok(IngestionStage::Transcribing),
            "extracting" => Ok(IngestionStage::Extracting),
            "persisting" => Ok(IngestionStage::Persisting),
            "integrating_crm" => Ok(IngestionStage::IntegratingCrm),
            "completed" => Ok(IngestionStage::Completed),
            "completed_with_crm_error" => Ok(IngestionStage::CompletedWithCrmError),
            "failed" => Ok(IngestionStage::Failed),
            other => Err(format!("unknown ingestion stage: {}", other)),
        }
    }
}

/// Outcome of a finished ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Processed,
    ProcessedWithCrmError,
    Failed,
}

/// Classified pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    AudioFetchFailed,
    TranscriptionFailed,
    ExtractionFailed,
    PersistenceFailed,
    /// Non-fatal: record ends as `CompletedWithCrmError`
    CrmIntegrationFailed,
    /// Stage or overall deadline exceeded
    Timeout,
    /// Cancelled (tenant deactivated, explicit cancel, shutdown)
    Cancelled,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorKind::AudioFetchFailed => "audio_fetch_failed",
            PipelineErrorKind::TranscriptionFailed => "transcription_failed",
            PipelineErrorKind::ExtractionFailed => "extraction_failed",
            PipelineErrorKind::PersistenceFailed => "persistence_failed",
            PipelineErrorKind::CrmIntegrationFailed => "crm_integration_failed",
            PipelineErrorKind::Timeout => "timeout",
            PipelineErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail attached to a stage history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct StageFailure {
    pub kind: PipelineErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One entry of the per-stage timing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: IngestionStage,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

/// Rejected stage change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid stage transition {from} -> {to}")]
pub struct TransitionError {
    pub from: IngestionStage,
    pub to: IngestionStage,
}

/// Durable per-ingestion record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub ingestion_id: Uuid,
    pub tenant_id: String,
    pub call_id: String,
    pub stage: IngestionStage,
    pub stage_history: Vec<StageRecord>,
    pub extracted_data: Option<Value>,
    pub confidence: Option<f64>,
    pub crm_lead_id: Option<String>,
    pub final_status: Option<FinalStatus>,
    pub failure: Option<StageFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionRecord {
    /// Create a record in the `Received` stage
    pub fn new(tenant_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            ingestion_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            call_id: call_id.into(),
            stage: IngestionStage::Received,
            stage_history: vec![StageRecord {
                stage: IngestionStage::Received,
                started_at: now,
                completed_at: None,
                error: None,
            }],
            extracted_data: None,
            confidence: None,
            crm_lead_id: None,
            final_status: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to `next`, closing the current history entry
    pub fn transition_to(&mut self, next: IngestionStage) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(next) {
            return Err(TransitionError {
                from: self.stage,
                to: next,
            });
        }

        let now = Utc::now();
        if let Some(current) = self.stage_history.last_mut() {
            if current.completed_at.is_none() {
                current.completed_at = Some(now);
            }
        }

        self.stage_history.push(StageRecord {
            stage: next,
            started_at: now,
            completed_at: next.is_terminal().then_some(now),
            error: None,
        });
        self.stage = next;
        self.final_status = next.final_status();
        self.updated_at = now;
        Ok(())
    }

    /// Record a fatal error on the current stage and move to `Failed`
    pub fn fail(&mut self, failure: StageFailure) -> Result<(), TransitionError> {
        self.finish_with_error(IngestionStage::Failed, failure)
    }

    /// Record a CRM error and move to `CompletedWithCrmError`
    pub fn fail_crm(&mut self, failure: StageFailure) -> Result<(), TransitionError> {
        self.finish_with_error(IngestionStage::CompletedWithCrmError, failure)
    }

    fn finish_with_error(
        &mut self,
        terminal: IngestionStage,
        failure: StageFailure,
    ) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(terminal) {
            return Err(TransitionError {
                from: self.stage,
                to: terminal,
            });
        }
        if let Some(current) = self.stage_history.last_mut() {
            current.error = Some(failure.clone());
        }
        self.transition_to(terminal)?;
        self.failure = Some(failure);
        Ok(())
    }
}

/// What the persistence stage writes to durable storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionDocument {
    pub ingestion_id: Uuid,
    pub tenant_id: String,
    pub call_id: String,
    pub transcript: String,
    pub transcription_confidence: f64,
    pub extracted_data: Value,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [IngestionStage; 6] = [
        IngestionStage::DownloadingAudio,
        IngestionStage::Transcribing,
        IngestionStage::Extracting,
        IngestionStage::Persisting,
        IngestionStage::IntegratingCrm,
        IngestionStage::Completed,
    ];

    #[test]
    fn test_happy_path_transitions() {
        let mut record = IngestionRecord::new("t-1", "call-1");
        for stage in HAPPY_PATH {
            record.transition_to(stage).unwrap();
        }

        assert_eq!(record.stage, IngestionStage::Completed);
        assert_eq!(record.final_status, Some(FinalStatus::Processed));
        assert_eq!(record.stage_history.len(), 7);
        assert!(record.stage_history.iter().all(|s| s.completed_at.is_some()));
        assert!(record.failure.is_none());
    }

    #[test]
    fn test_stage_skipping_rejected() {
        let mut record = IngestionRecord::new("t-1", "call-1");
        let err = record.transition_to(IngestionStage::Transcribing).unwrap_err();
        assert_eq!(err.from, IngestionStage::Received);
        assert_eq!(err.to, IngestionStage::Transcribing);
        // Record untouched
        assert_eq!(record.stage, IngestionStage::Received);
        assert_eq!(record.stage_history.len(), 1);
    }

    #[test]
    fn test_crm_gate_closed_skips_to_completed() {
        let mut record = IngestionRecord::new("t-1", "call-1");
        for stage in &HAPPY_PATH[..4] {
            record.transition_to(*stage).unwrap();
        }
        assert!(record.transition_to(IngestionStage::Completed).is_ok());
        assert!(!record
            .stage_history
            .iter()
            .any(|s| s.stage == IngestionStage::IntegratingCrm));
    }

    #[test]
    fn test_crm_error_only_from_integrating_crm() {
        assert!(!IngestionStage::Persisting.can_transition_to(IngestionStage::CompletedWithCrmError));
        assert!(!IngestionStage::Extracting.can_transition_to(IngestionStage::CompletedWithCrmError));
        assert!(IngestionStage::IntegratingCrm.can_transition_to(IngestionStage::CompletedWithCrmError));
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_stage() {
        let non_terminal = [
            IngestionStage::Received,
            IngestionStage::DownloadingAudio,
            IngestionStage::Transcribing,
            IngestionStage::Extracting,
            IngestionStage::Persisting,
            IngestionStage::IntegratingCrm,
        ];
        for stage in non_terminal {
            assert!(stage.can_transition_to(IngestionStage::Failed), "{}", stage);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            IngestionStage::Completed,
            IngestionStage::CompletedWithCrmError,
            IngestionStage::Failed,
        ] {
            for next in HAPPY_PATH {
                assert!(!terminal.can_transition_to(next));
            }
            assert!(!terminal.can_transition_to(IngestionStage::Failed));
        }
    }

    #[test]
    fn test_fail_attaches_error_to_current_stage() {
        let mut record = IngestionRecord::new("t-1", "call-1");
        record.transition_to(IngestionStage::DownloadingAudio).unwrap();
        record
            .fail(StageFailure::new(PipelineErrorKind::AudioFetchFailed, "404"))
            .unwrap();

        assert_eq!(record.stage, IngestionStage::Failed);
        assert_eq!(record.final_status, Some(FinalStatus::Failed));
        let download = &record.stage_history[1];
        assert_eq!(download.stage, IngestionStage::DownloadingAudio);
        assert_eq!(
            download.error.as_ref().map(|e| e.kind),
            Some(PipelineErrorKind::AudioFetchFailed)
        );
        assert_eq!(record.failure.as_ref().unwrap().message, "404");
    }

    #[test]
    fn test_fail_crm_keeps_extracted_data() {
        let mut record = IngestionRecord::new("t-1", "call-1");
        for stage in &HAPPY_PATH[..5] {
            record.transition_to(*stage).unwrap();
        }
        record.extracted_data = Some(serde_json::json!({"intent": "quote"}));
        record
            .fail_crm(StageFailure::new(PipelineErrorKind::CrmIntegrationFailed, "503"))
            .unwrap();

        assert_eq!(record.stage, IngestionStage::CompletedWithCrmError);
        assert_eq!(record.final_status, Some(FinalStatus::ProcessedWithCrmError));
        assert!(record.extracted_data.is_some());
    }

    #[test]
    fn test_stage_string_roundtrip() {
        for stage in HAPPY_PATH {
            assert_eq!(stage.as_str().parse::<IngestionStage>().unwrap(), stage);
        }
        assert!("bogus".parse::<IngestionStage>().is_err());
        assert_eq!(
            serde_json::to_string(&IngestionStage::CompletedWithCrmError).unwrap(),
            "\"completed_with_crm_error\""
        );
    }
}
