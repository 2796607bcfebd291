//! Stage execution for one ingestion
//!
//! Stages run strictly in order. Before each stage the tenant's activity is
//! re-checked; the stage then races its collaborator call against the
//! ingestion's cancellation token and `min(stage_timeout, time left before
//! the overall deadline)`.

use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::PipelineOrchestrator;
use crate::models::{
    CallEventPayload, IngestionDocument, IngestionRecord, IngestionStage, PipelineErrorKind,
    StageFailure, Tenant,
};
use crate::services::collaborators::{
    normalize_confidence, CollaboratorError, LeadData, StageContext,
};

impl PipelineOrchestrator {
    /// Run the pipeline to a terminal state and return the final record
    pub(super) async fn execute(
        &self,
        mut record: IngestionRecord,
        tenant: Tenant,
        payload: CallEventPayload,
        cancel: CancellationToken,
    ) -> IngestionRecord {
        let started = Instant::now();
        let deadline = started + self.config.overall_deadline;
        let ctx = StageContext {
            ingestion_id: record.ingestion_id,
            tenant_id: record.tenant_id.clone(),
            cancel,
        };

        if let Err(failure) = self.drive(&mut record, &tenant, &payload, &ctx, deadline).await {
            warn!(
                ingestion_id = %record.ingestion_id,
                tenant_id = %record.tenant_id,
                stage = %record.stage,
                kind = %failure.kind,
                "Ingestion failed: {}",
                failure.message
            );
            if let Err(e) = record.fail(failure) {
                error!(ingestion_id = %record.ingestion_id, "Could not mark ingestion failed: {}", e);
            }
            self.checkpoint(&record).await;
        }

        info!(
            ingestion_id = %record.ingestion_id,
            tenant_id = %record.tenant_id,
            stage = %record.stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion finished"
        );
        record
    }

    async fn drive(
        &self,
        record: &mut IngestionRecord,
        tenant: &Tenant,
        payload: &CallEventPayload,
        ctx: &StageContext,
        deadline: Instant,
    ) -> Result<(), StageFailure> {
        let collaborators = &self.collaborators;

        let audio = self
            .run_stage(
                record,
                IngestionStage::DownloadingAudio,
                PipelineErrorKind::AudioFetchFailed,
                ctx,
                deadline,
                async {
                    match payload.recording_url.as_deref() {
                        Some(url) => collaborators.audio.fetch(url, ctx).await,
                        None => Err(CollaboratorError::Rejected(
                            "call event has no recording_url".to_string(),
                        )),
                    }
                },
            )
            .await?;

        let transcript = self
            .run_stage(
                record,
                IngestionStage::Transcribing,
                PipelineErrorKind::TranscriptionFailed,
                ctx,
                deadline,
                collaborators.transcriber.transcribe(&audio, ctx),
            )
            .await?;
        drop(audio);

        let extraction = self
            .run_stage(
                record,
                IngestionStage::Extracting,
                PipelineErrorKind::ExtractionFailed,
                ctx,
                deadline,
                collaborators
                    .extractor
                    .extract(&transcript.text, &tenant.processing_rules, ctx),
            )
            .await?;

        let confidence = normalize_confidence(extraction.confidence);
        record.extracted_data = Some(extraction.data.clone());
        record.confidence = Some(confidence);

        let document = IngestionDocument {
            ingestion_id: record.ingestion_id,
            tenant_id: record.tenant_id.clone(),
            call_id: record.call_id.clone(),
            transcript: transcript.text,
            transcription_confidence: normalize_confidence(transcript.confidence),
            extracted_data: extraction.data,
            confidence,
        };
        self.run_stage(
            record,
            IngestionStage::Persisting,
            PipelineErrorKind::PersistenceFailed,
            ctx,
            deadline,
            collaborators.persister.save(&document, ctx),
        )
        .await?;

        if !tenant.crm_gate_open(confidence) {
            info!(
                ingestion_id = %record.ingestion_id,
                confidence,
                threshold = tenant.min_confidence_for_crm,
                "Confidence below CRM threshold, skipping lead creation"
            );
            return self.complete(record).await;
        }

        let lead = LeadData {
            ingestion_id: record.ingestion_id,
            tenant_id: record.tenant_id.clone(),
            call_id: record.call_id.clone(),
            caller_number: payload.caller_number.clone(),
            caller_name: payload.caller_name.clone(),
            duration: payload.duration,
            extracted_data: document.extracted_data.clone(),
            confidence,
            custom_fields: payload.custom_fields.clone(),
        };

        let crm_result = self
            .run_stage(
                record,
                IngestionStage::IntegratingCrm,
                PipelineErrorKind::CrmIntegrationFailed,
                ctx,
                deadline,
                collaborators.crm.create_lead(&lead, &tenant.crm_config, ctx),
            )
            .await;

        match crm_result {
            Ok(lead_id) => {
                info!(ingestion_id = %record.ingestion_id, crm_lead_id = %lead_id, "CRM lead created");
                record.crm_lead_id = Some(lead_id);
                self.complete(record).await
            }
            Err(failure) if failure.kind == PipelineErrorKind::CrmIntegrationFailed => {
                warn!(
                    ingestion_id = %record.ingestion_id,
                    tenant_id = %record.tenant_id,
                    "CRM integration failed, keeping extracted data: {}",
                    failure.message
                );
                record
                    .fail_crm(failure)
                    .map_err(|e| StageFailure::new(PipelineErrorKind::CrmIntegrationFailed, e.to_string()))?;
                self.checkpoint(record).await;
                Ok(())
            }
            Err(failure) => Err(failure),
        }
    }

    /// Enter `stage`, run `work` under the stage budget and classify the outcome
    async fn run_stage<T, F>(
        &self,
        record: &mut IngestionRecord,
        stage: IngestionStage,
        error_kind: PipelineErrorKind,
        ctx: &StageContext,
        deadline: Instant,
        work: F,
    ) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        self.ensure_runnable(record, ctx).await?;

        record
            .transition_to(stage)
            .map_err(|e| StageFailure::new(error_kind, e.to_string()))?;
        self.checkpoint(record).await;

        let started = Instant::now();
        let budget = self
            .config
            .stage_timeout
            .min(deadline.saturating_duration_since(started));

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(StageFailure::new(
                PipelineErrorKind::Cancelled,
                format!("cancelled during {}", stage),
            )),
            result = tokio::time::timeout(budget, work) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(StageFailure::new(error_kind, e.to_string())),
                Err(_) => Err(StageFailure::new(
                    PipelineErrorKind::Timeout,
                    format!("{} exceeded {} ms", stage, budget.as_millis()),
                )),
            },
        };

        debug!(
            ingestion_id = %record.ingestion_id,
            stage = %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Stage finished"
        );
        outcome
    }

    /// Refuse to start a stage for a cancelled ingestion or inactive tenant
    async fn ensure_runnable(
        &self,
        record: &IngestionRecord,
        ctx: &StageContext,
    ) -> Result<(), StageFailure> {
        if ctx.cancel.is_cancelled() {
            return Err(StageFailure::new(PipelineErrorKind::Cancelled, "ingestion cancelled"));
        }

        match self.registry.is_active(&record.tenant_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                ctx.cancel.cancel();
                Err(StageFailure::new(
                    PipelineErrorKind::Cancelled,
                    "tenant deactivated",
                ))
            }
            Err(e) => {
                // Registry outage: keep going, the stage itself will surface storage problems
                warn!(tenant_id = %record.tenant_id, "Tenant activity check failed: {}", e);
                Ok(())
            }
        }
    }

    async fn complete(&self, record: &mut IngestionRecord) -> Result<(), StageFailure> {
        let kind = match record.stage {
            IngestionStage::IntegratingCrm => PipelineErrorKind::CrmIntegrationFailed,
            _ => PipelineErrorKind::PersistenceFailed,
        };
        record
            .transition_to(IngestionStage::Completed)
            .map_err(|e| StageFailure::new(kind, e.to_string()))?;
        self.checkpoint(record).await;
        Ok(())
    }

    /// Best-effort status write
    async fn checkpoint(&self, record: &IngestionRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(
                ingestion_id = %record.ingestion_id,
                stage = %record.stage,
                "Failed to save ingestion status: {}",
                e
            );
        }
    }
}
