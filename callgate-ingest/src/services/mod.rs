//! Service layer: admission, tenancy, pipeline and collaborators

pub mod audit_logger;
pub mod collaborators;
pub mod gatekeeper;
pub mod http_collaborators;
pub mod pipeline_orchestrator;
pub mod rate_limiter;
pub mod status_store;
pub mod tenant_registry;

pub use audit_logger::{AuditLogger, SqliteAuditLogger};
pub use collaborators::{
    AudioFetcher, CollaboratorError, Collaborators, CrmClient, Extraction, Extractor, LeadData,
    RecordPersister, StageContext, Transcriber, Transcript,
};
pub use gatekeeper::{Admission, AdmissionAudit, AdmissionError, Gatekeeper, GatekeeperConfig};
pub use pipeline_orchestrator::{OrchestratorConfig, PipelineOrchestrator, Submission, SubmitError};
pub use rate_limiter::{FixedWindowRateLimiter, RateLimiter, RateLimiterWindow};
pub use status_store::{ClaimOutcome, SqliteStatusStore, StatusStore};
pub use tenant_registry::{SqliteTenantRegistry, TenantRegistry};
