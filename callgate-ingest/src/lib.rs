//! callgate-ingest library interface
//!
//! Webhook gatekeeper and ingestion pipeline for multi-tenant call events.
//! Exposes the router and service wiring for the binary and integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use callgate_common::config::ServiceConfig;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::services::http_collaborators::{
    build_http_client, HttpAudioFetcher, HttpCrmClient, HttpExtractor, HttpTranscriber,
    SqlitePersister,
};
use crate::services::{
    Collaborators, FixedWindowRateLimiter, Gatekeeper, GatekeeperConfig, OrchestratorConfig,
    PipelineOrchestrator, SqliteAuditLogger, SqliteStatusStore, SqliteTenantRegistry,
    TenantRegistry,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub orchestrator: PipelineOrchestrator,
    pub registry: Arc<dyn TenantRegistry>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        orchestrator: PipelineOrchestrator,
        registry: Arc<dyn TenantRegistry>,
    ) -> Self {
        Self {
            gatekeeper,
            orchestrator,
            registry,
            startup_time: Utc::now(),
        }
    }

    /// Wire SQLite-backed services around the given collaborators
    pub fn with_collaborators(
        db: SqlitePool,
        config: &ServiceConfig,
        collaborators: Collaborators,
    ) -> callgate_common::Result<Self> {
        let registry: Arc<dyn TenantRegistry> = Arc::new(SqliteTenantRegistry::new(
            db.clone(),
            config.tenant_cache_ttl(),
        ));

        let gatekeeper = Arc::new(Gatekeeper::new(
            GatekeeperConfig::from_service_config(config)?,
            Arc::clone(&registry),
            Arc::new(FixedWindowRateLimiter::new(config.rate_limit_window())),
            Arc::new(SqliteAuditLogger::new(db.clone())),
        ));

        let orchestrator = PipelineOrchestrator::new(
            Arc::new(SqliteStatusStore::new(db)),
            Arc::clone(&registry),
            collaborators,
            OrchestratorConfig::from(&config.pipeline),
        );

        Ok(Self::new(gatekeeper, orchestrator, registry))
    }

    /// Production wiring: HTTP collaborators plus the SQLite persister
    pub fn from_config(db: SqlitePool, config: &ServiceConfig) -> callgate_common::Result<Self> {
        let client = build_http_client(Duration::from_secs(config.collaborators.http_timeout_secs))
            .map_err(|e| callgate_common::Error::Config(format!("HTTP client: {}", e)))?;

        let collaborators = Collaborators {
            audio: Arc::new(HttpAudioFetcher::new(
                client.clone(),
                config.collaborators.max_audio_bytes,
            )),
            transcriber: Arc::new(HttpTranscriber::new(
                client.clone(),
                config.collaborators.transcription_url.clone(),
            )),
            extractor: Arc::new(HttpExtractor::new(
                client.clone(),
                config.collaborators.extraction_url.clone(),
            )),
            persister: Arc::new(SqlitePersister::new(db.clone())),
            crm: Arc::new(HttpCrmClient::new(client)),
        };

        Self::with_collaborators(db, config, collaborators)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::webhook_routes())
        .merge(api::status_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
