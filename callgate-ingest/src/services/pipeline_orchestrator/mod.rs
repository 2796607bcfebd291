//! Pipeline orchestrator
//!
//! Turns admitted deliveries into ingestion records and drives each one
//! through the stage machine on its own task. Admission returns as soon as
//! the record is claimed; the pipeline runs in the background.
//!
//! Concurrency bounds:
//! - A semaphore caps in-flight ingestions; when it is exhausted `submit`
//!   fails with `SubmitError::Overloaded` instead of queueing.
//! - Every ingestion gets a child of the service shutdown token, registered
//!   so it can be cancelled individually or per tenant.
//! - Spawned tasks are tracked so `shutdown` can wait for every record to
//!   reach a terminal state.

mod stages;

use callgate_common::config::PipelineConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use uuid::Uuid;

use crate::models::{IngestionRecord, IngestionStage};
use crate::services::collaborators::Collaborators;
use crate::services::gatekeeper::Admission;
use crate::services::status_store::{ClaimOutcome, StatusStore};
use crate::services::tenant_registry::TenantRegistry;

/// Orchestrator bounds
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub max_in_flight: usize,
    pub stage_timeout: Duration,
    pub overall_deadline: Duration,
}

impl From<&PipelineConfig> for OrchestratorConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            stage_timeout: config.stage_timeout(),
            overall_deadline: config.overall_deadline(),
        }
    }
}

/// Result of handing an admission to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// New ingestion started
    Accepted { ingestion_id: Uuid },
    /// The idempotency key was already claimed; nothing was started
    AlreadyProcessed {
        ingestion_id: Uuid,
        stage: IngestionStage,
    },
}

impl Submission {
    pub fn ingestion_id(&self) -> Uuid {
        match self {
            Submission::Accepted { ingestion_id } => *ingestion_id,
            Submission::AlreadyProcessed { ingestion_id, .. } => *ingestion_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Submission::AlreadyProcessed { .. })
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Retriable: the in-flight ceiling is reached
    #[error("Pipeline at capacity ({max_in_flight} ingestions in flight)")]
    Overloaded { max_in_flight: usize },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Status store error: {0}")]
    Store(#[from] callgate_common::Error),
}

struct ActiveIngestion {
    tenant_id: String,
    cancel: CancellationToken,
}

/// Drives admitted ingestions through the pipeline
#[derive(Clone)]
pub struct PipelineOrchestrator {
    store: Arc<dyn StatusStore>,
    registry: Arc<dyn TenantRegistry>,
    collaborators: Collaborators,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<Uuid, ActiveIngestion>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn StatusStore>,
        registry: Arc<dyn TenantRegistry>,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            collaborators,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Claim the idempotency key and start the pipeline
    ///
    /// Duplicate deliveries return the original ingestion id and start
    /// nothing. The in-flight permit is taken before the record is created,
    /// so an overloaded service leaves no orphan records behind.
    pub async fn submit(&self, admission: Admission) -> Result<Submission, SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let Admission { tenant, event, .. } = admission;

        if let Some(existing) = self
            .store
            .find_by_idempotency_key(&event.tenant_id, &event.call_id)
            .await?
        {
            return Ok(duplicate(existing));
        }

        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| SubmitError::Overloaded {
                max_in_flight: self.config.max_in_flight,
            })?;

        let record = IngestionRecord::new(event.tenant_id.clone(), event.call_id.clone());
        if let ClaimOutcome::Existing(existing) = self.store.claim(&record).await? {
            return Ok(duplicate(existing));
        }

        let ingestion_id = record.ingestion_id;
        let cancel = self.shutdown.child_token();
        self.lock_active().insert(
            ingestion_id,
            ActiveIngestion {
                tenant_id: record.tenant_id.clone(),
                cancel: cancel.clone(),
            },
        );

        info!(
            ingestion_id = %ingestion_id,
            tenant_id = %record.tenant_id,
            call_id = %record.call_id,
            "Ingestion accepted"
        );

        let this = self.clone();
        let payload = event.payload;
        self.tracker.spawn(async move {
            let _permit = permit;
            this.execute(record, tenant, payload, cancel).await;
            this.lock_active().remove(&ingestion_id);
        });

        Ok(Submission::Accepted { ingestion_id })
    }

    /// Current record for an ingestion, scoped to its tenant
    pub async fn status(
        &self,
        tenant_id: &str,
        ingestion_id: Uuid,
    ) -> callgate_common::Result<Option<IngestionRecord>> {
        self.store.get_by_id(tenant_id, ingestion_id).await
    }

    /// Cancel one in-flight ingestion; false if it is not running
    pub fn cancel(&self, ingestion_id: Uuid) -> bool {
        match self.lock_active().get(&ingestion_id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight ingestion of a tenant; returns how many
    pub fn cancel_tenant(&self, tenant_id: &str) -> usize {
        let active = self.lock_active();
        let mut cancelled = 0;
        for ingestion in active.values().filter(|a| a.tenant_id == tenant_id) {
            ingestion.cancel.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(tenant_id = %tenant_id, cancelled, "Cancelled in-flight ingestions");
        }
        cancelled
    }

    /// Number of ingestions currently running
    pub fn in_flight(&self) -> usize {
        self.lock_active().len()
    }

    /// Wait for every running ingestion to finish without cancelling it
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        // Once shutdown has closed the tracker it must stay closed
        if !self.shutdown.is_cancelled() {
            self.tracker.reopen();
        }
    }

    /// Stop accepting work, cancel running ingestions and wait for them to
    /// record their terminal state
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "Pipeline shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Pipeline stopped");
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ActiveIngestion>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn duplicate(existing: IngestionRecord) -> Submission {
    info!(
        ingestion_id = %existing.ingestion_id,
        tenant_id = %existing.tenant_id,
        call_id = %existing.call_id,
        "Duplicate delivery, already processed"
    );
    Submission::AlreadyProcessed {
        ingestion_id: existing.ingestion_id,
        stage: existing.stage,
    }
}
