//! Test Helper Utilities
//!
//! Shared fixtures for callgate-ingest integration tests

#![allow(dead_code)]

pub mod mock_collaborators;

pub use mock_collaborators::{CallCounters, Script, ScriptedCollaborators};

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use callgate_common::signature::compute_signature;
use callgate_ingest::models::{
    CallEventPayload, IngestionEvent, IngestionRecord, SecurityLevel, Tenant, WebhookSecret,
};
use callgate_ingest::services::{
    Admission, FixedWindowRateLimiter, Gatekeeper, GatekeeperConfig, OrchestratorConfig,
    PipelineOrchestrator, SqliteAuditLogger, SqliteStatusStore, SqliteTenantRegistry,
    TenantRegistry,
};
use callgate_ingest::AppState;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Fresh in-memory database with the full schema
pub async fn create_test_db() -> SqlitePool {
    callgate_ingest::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database")
}

/// Active tenant with a 50/minute limit and a 0.8 CRM threshold
pub fn test_tenant(tenant_id: &str, company_id: &str, secret: &str) -> Tenant {
    Tenant {
        tenant_id: tenant_id.to_string(),
        external_company_id: company_id.to_string(),
        is_active: true,
        webhook_secret: WebhookSecret::new(secret),
        rate_limit_per_minute: 50,
        crm_config: json!({"endpoint": "https://crm.example.com/leads"}),
        processing_rules: json!({"extract": ["intent", "product"]}),
        min_confidence_for_crm: 0.8,
        security_level: SecurityLevel::Standard,
    }
}

pub async fn seed_tenant(pool: &SqlitePool, tenant: &Tenant) {
    callgate_ingest::db::tenants::upsert_tenant(pool, tenant)
        .await
        .expect("Failed to seed tenant");
}

/// `sha256=<hex>` signature header value
pub fn sign(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", compute_signature(secret.as_bytes(), body))
}

/// Call event JSON body
pub fn call_event(call_id: &str, company_id: &str) -> Value {
    json!({
        "call_id": call_id,
        "company_id": company_id,
        "duration": 184,
        "caller_number": "+1 (555) 123-4567",
        "caller_name": "Pat Doe",
        "recording_url": format!("https://recordings.example.com/{}.wav", call_id),
        "custom_fields": {
            "campaign": "spring",
            "ssn": "123-45-6789",
            "callback_phone": "555-987-6543"
        }
    })
}

pub fn body_bytes(event: &Value) -> Vec<u8> {
    serde_json::to_vec(event).unwrap()
}

/// Headers carrying a signature over `body`
pub fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, sign(secret, body).parse().unwrap());
    headers
}

/// Admission built directly, bypassing the gatekeeper
pub fn admission_for(tenant: &Tenant, call_id: &str) -> Admission {
    let event = call_event(call_id, &tenant.external_company_id);
    let payload: CallEventPayload = serde_json::from_value(event.clone()).unwrap();
    Admission {
        admission_token: uuid::Uuid::new_v4(),
        tenant: tenant.clone(),
        event: IngestionEvent {
            call_id: call_id.to_string(),
            tenant_id: tenant.tenant_id.clone(),
            payload,
            raw_payload: body_bytes(&event),
            received_at: Utc::now(),
        },
    }
}

pub fn fast_pipeline() -> OrchestratorConfig {
    OrchestratorConfig {
        max_in_flight: 128,
        stage_timeout: Duration::from_secs(5),
        overall_deadline: Duration::from_secs(30),
    }
}

/// Fully wired service over an in-memory database and scripted collaborators
pub struct TestService {
    pub pool: SqlitePool,
    pub mocks: Arc<ScriptedCollaborators>,
    pub counters: Arc<CallCounters>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub orchestrator: PipelineOrchestrator,
    pub state: AppState,
}

impl TestService {
    pub async fn start(script: Script, pipeline: OrchestratorConfig) -> Self {
        let pool = create_test_db().await;
        let mocks = ScriptedCollaborators::new(script);
        let counters = mocks.counters();

        let registry: Arc<dyn TenantRegistry> =
            Arc::new(SqliteTenantRegistry::new(pool.clone(), Duration::from_secs(30)));

        let gatekeeper = Arc::new(Gatekeeper::new(
            GatekeeperConfig {
                max_body_bytes: MAX_BODY_BYTES,
                signature_header: SIGNATURE_HEADER.parse().unwrap(),
            },
            Arc::clone(&registry),
            Arc::new(FixedWindowRateLimiter::per_minute()),
            Arc::new(SqliteAuditLogger::new(pool.clone())),
        ));

        let orchestrator = PipelineOrchestrator::new(
            Arc::new(SqliteStatusStore::new(pool.clone())),
            Arc::clone(&registry),
            mocks.bundle(),
            pipeline,
        );

        let state = AppState::new(Arc::clone(&gatekeeper), orchestrator.clone(), registry);

        Self {
            pool,
            mocks,
            counters,
            gatekeeper,
            orchestrator,
            state,
        }
    }

    pub async fn with_defaults() -> Self {
        Self::start(Script::default(), fast_pipeline()).await
    }

    pub fn router(&self) -> axum::Router {
        callgate_ingest::build_router(self.state.clone())
    }

    /// Record as stored, scoped to its tenant
    pub async fn record(&self, tenant_id: &str, ingestion_id: uuid::Uuid) -> IngestionRecord {
        self.orchestrator
            .status(tenant_id, ingestion_id)
            .await
            .unwrap()
            .expect("ingestion record missing")
    }

    /// Poll until the stored record reaches `predicate` or the timeout elapses
    pub async fn wait_for<F>(&self, tenant_id: &str, ingestion_id: uuid::Uuid, predicate: F) -> IngestionRecord
    where
        F: Fn(&IngestionRecord) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.record(tenant_id, ingestion_id).await;
            if predicate(&record) || tokio::time::Instant::now() >= deadline {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
