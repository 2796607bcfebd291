//! Data models for callgate-ingest

pub mod audit;
pub mod ingestion;
pub mod tenant;
pub mod webhook;

pub use audit::{AuditEventType, SecurityAuditEvent};
pub use ingestion::{
    FinalStatus, IngestionDocument, IngestionRecord, IngestionStage, PipelineErrorKind,
    StageFailure, StageRecord, TransitionError,
};
pub use tenant::{SecurityLevel, Tenant, WebhookSecret};
pub use webhook::{CallEventPayload, IngestionEvent};
