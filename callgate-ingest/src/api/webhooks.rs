//! Webhook admission endpoint
//!
//! POST /webhooks/calls

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::{
    error::ApiResult,
    services::{Submission, SubmitError},
    AppState,
};

/// POST /webhooks/calls response
#[derive(Debug, Serialize)]
pub struct WebhookAcceptedResponse {
    /// "accepted" or "already_processed"
    pub status: &'static str,
    pub ingestion_id: Uuid,
    pub tenant_id: String,
    pub processed_at: DateTime<Utc>,
}

/// POST /webhooks/calls
///
/// The body is read as raw bytes (the signature covers them verbatim) and
/// capped at the configured size before anything parses it. A store failure
/// during submit answers 500 and is logged, not audited.
pub async fn receive_call_event(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<WebhookAcceptedResponse>> {
    let source_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let max = state.gatekeeper.max_body_bytes();

    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > max) {
        return Err(state.gatekeeper.reject_oversized(source_ip).await.into());
    }

    let raw = match to_bytes(body, max).await {
        Ok(bytes) => bytes,
        Err(_) => return Err(state.gatekeeper.reject_oversized(source_ip).await.into()),
    };

    let (admission, audit) = state.gatekeeper.screen(&raw, &headers, source_ip).await?;
    let tenant_id = admission.tenant.tenant_id.clone();

    // The admission decision is audited only once the pipeline has answered
    let submission = match state.orchestrator.submit(admission).await {
        Ok(submission) => submission,
        Err(e) => {
            if matches!(e, SubmitError::Overloaded { .. } | SubmitError::ShuttingDown) {
                state.gatekeeper.record_refused(audit, &e.to_string()).await;
            }
            return Err(e.into());
        }
    };
    state
        .gatekeeper
        .record_accepted(audit, Some(submission.ingestion_id()))
        .await;
    let status = match submission {
        Submission::Accepted { .. } => "accepted",
        Submission::AlreadyProcessed { .. } => "already_processed",
    };

    Ok(Json(WebhookAcceptedResponse {
        status,
        ingestion_id: submission.ingestion_id(),
        tenant_id,
        processed_at: Utc::now(),
    }))
}

/// Build webhook routes
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/calls", post(receive_call_event))
}
