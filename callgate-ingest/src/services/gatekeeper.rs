//! Webhook gatekeeper
//!
//! Admission checks run in a fixed order and stop at the first failure:
//!
//! 1. Body size
//! 2. Signature header present
//! 3. Provisional `company_id` read from the JSON body
//! 4. Tenant resolution
//! 5. HMAC-SHA256 over the raw bytes, constant-time compare
//! 6. Structural validation of the typed payload
//! 7. Tenant activity (authoritative, uncached)
//! 8. Per-tenant rate limit
//!
//! The provisional `company_id` is never trusted: it only selects which
//! secret to verify with. Every outcome writes exactly one audit event.
//! Payload contents appear in audit details only after sanitization.

use axum::http::{HeaderMap, HeaderName, StatusCode};
use callgate_common::config::ServiceConfig;
use callgate_common::sanitize::sanitize_value;
use callgate_common::signature::verify_signature;
use chrono::Utc;
use serde_json::error::Category;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::webhook::is_well_formed_identifier;
use crate::models::{
    AuditEventType, CallEventPayload, IngestionEvent, SecurityAuditEvent, SecurityLevel, Tenant,
};
use crate::services::audit_logger::AuditLogger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::tenant_registry::TenantRegistry;

/// Admission rejection
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown tenant")]
    UnknownTenant,

    #[error("Tenant is inactive")]
    InactiveTenant,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AdmissionError::MissingSignature | AdmissionError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            AdmissionError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AdmissionError::UnknownTenant | AdmissionError::InactiveTenant => StatusCode::FORBIDDEN,
            AdmissionError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AdmissionError::MissingSignature => "MISSING_SIGNATURE",
            AdmissionError::InvalidSignature => "INVALID_SIGNATURE",
            AdmissionError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            AdmissionError::UnknownTenant => "UNKNOWN_TENANT",
            AdmissionError::InactiveTenant => "INACTIVE_TENANT",
            AdmissionError::RateLimited => "RATE_LIMITED",
            AdmissionError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Audit classification; internal failures are logged, not audited
    pub fn audit_type(&self) -> Option<AuditEventType> {
        match self {
            AdmissionError::PayloadTooLarge { .. } | AdmissionError::MalformedPayload(_) => {
                Some(AuditEventType::MalformedPayload)
            }
            AdmissionError::MissingSignature => Some(AuditEventType::MissingSignature),
            AdmissionError::InvalidSignature => Some(AuditEventType::InvalidSignature),
            AdmissionError::UnknownTenant | AdmissionError::InactiveTenant => {
                Some(AuditEventType::UnauthorizedTenant)
            }
            AdmissionError::RateLimited => Some(AuditEventType::RateLimited),
            AdmissionError::Internal(_) => None,
        }
    }

    /// Message safe to return to an unauthenticated caller
    pub fn public_message(&self) -> String {
        match self {
            AdmissionError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// A successfully admitted delivery
#[derive(Debug, Clone)]
pub struct Admission {
    /// Correlates the success audit event with the ingestion
    pub admission_token: Uuid,
    pub tenant: Tenant,
    pub event: IngestionEvent,
}

/// Success audit event held back until the pipeline decides
#[derive(Debug)]
pub struct AdmissionAudit {
    tenant_id: String,
    call_id: String,
    source_ip: Option<String>,
    details: Value,
}

/// Gatekeeper settings
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub max_body_bytes: usize,
    pub signature_header: HeaderName,
}

impl GatekeeperConfig {
    pub fn from_service_config(config: &ServiceConfig) -> callgate_common::Result<Self> {
        let signature_header = HeaderName::from_bytes(config.signature_header.as_bytes())
            .map_err(|e| {
                callgate_common::Error::Config(format!(
                    "Invalid signature_header '{}': {}",
                    config.signature_header, e
                ))
            })?;
        Ok(Self {
            max_body_bytes: config.max_body_bytes,
            signature_header,
        })
    }
}

/// Rejection plus what is known about the caller at that point
struct Rejection {
    error: AdmissionError,
    tenant_id: Option<String>,
    details: Value,
    /// Replaces the error text in the audit trail when that text may echo payload values
    audit_reason: Option<String>,
}

impl Rejection {
    fn new(error: AdmissionError) -> Self {
        Self {
            error,
            tenant_id: None,
            details: Value::Null,
            audit_reason: None,
        }
    }

    /// Malformed JSON; the caller sees serde's message, the audit trail does not
    fn from_json_error(prefix: &str, e: &serde_json::Error) -> Self {
        let mut rejection = Self::new(AdmissionError::MalformedPayload(format!("{}: {}", prefix, e)));
        rejection.audit_reason = Some(json_error_summary(e));
        rejection
    }

    fn for_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

pub struct Gatekeeper {
    config: GatekeeperConfig,
    registry: Arc<dyn TenantRegistry>,
    limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditLogger>,
}

impl Gatekeeper {
    pub fn new(
        config: GatekeeperConfig,
        registry: Arc<dyn TenantRegistry>,
        limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            config,
            registry,
            limiter,
            audit,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.config.max_body_bytes
    }

    pub fn signature_header(&self) -> &HeaderName {
        &self.config.signature_header
    }

    /// Run every admission check and record the decision
    ///
    /// For callers that accept the delivery outright. The webhook handler
    /// uses [`Gatekeeper::screen`] instead so a pipeline refusal is not
    /// audited as a success.
    pub async fn admit(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        source_ip: Option<IpAddr>,
    ) -> Result<Admission, AdmissionError> {
        let (admission, audit) = self.screen(raw_body, headers, source_ip).await?;
        self.record_accepted(audit, None).await;
        Ok(admission)
    }

    /// Run every admission check; rejections are audited, acceptance is left
    /// to [`Gatekeeper::record_accepted`] or [`Gatekeeper::record_refused`]
    pub async fn screen(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        source_ip: Option<IpAddr>,
    ) -> Result<(Admission, AdmissionAudit), AdmissionError> {
        match self.evaluate(raw_body, headers).await {
            Ok(admission) => {
                let audit = AdmissionAudit {
                    tenant_id: admission.tenant.tenant_id.clone(),
                    call_id: admission.event.call_id.clone(),
                    source_ip: source_ip.map(|ip| ip.to_string()),
                    details: success_details(&admission, raw_body.len()),
                };
                Ok((admission, audit))
            }
            Err(rejection) => Err(self.audit_rejection(rejection, source_ip).await),
        }
    }

    /// Record a screened delivery the pipeline took (or already had)
    pub async fn record_accepted(&self, audit: AdmissionAudit, ingestion_id: Option<Uuid>) {
        let mut details = audit.details;
        if let Some(id) = ingestion_id {
            details["ingestion_id"] = json!(id);
        }
        self.write_audit(SecurityAuditEvent::new(
            AuditEventType::Success,
            Some(audit.tenant_id),
            audit.source_ip,
            details,
        ))
        .await;
    }

    /// Record a screened delivery turned away for backpressure
    ///
    /// Classified as `rate_limited`; `reason` tells capacity and shutdown
    /// refusals apart from the per-tenant limit.
    pub async fn record_refused(&self, audit: AdmissionAudit, reason: &str) {
        tracing::warn!(tenant_id = %audit.tenant_id, call_id = %audit.call_id, "Admission refused: {}", reason);
        self.write_audit(SecurityAuditEvent::new(
            AuditEventType::RateLimited,
            Some(audit.tenant_id),
            audit.source_ip,
            json!({
                "call_id": audit.call_id,
                "reason": reason,
            }),
        ))
        .await;
    }

    /// Reject a body that exceeded the size limit before it was fully read
    pub async fn reject_oversized(&self, source_ip: Option<IpAddr>) -> AdmissionError {
        let max = self.config.max_body_bytes;
        let rejection = Rejection::new(AdmissionError::PayloadTooLarge { max })
            .with_details(json!({ "reason": "body exceeds size limit", "max_body_bytes": max }));
        self.audit_rejection(rejection, source_ip).await
    }

    async fn evaluate(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<Admission, Rejection> {
        let body_bytes = raw_body.len();
        let max = self.config.max_body_bytes;

        if body_bytes > max {
            return Err(Rejection::new(AdmissionError::PayloadTooLarge { max })
                .with_details(json!({ "body_bytes": body_bytes, "max_body_bytes": max })));
        }

        let signature = match headers.get(&self.config.signature_header) {
            None => {
                return Err(Rejection::new(AdmissionError::MissingSignature)
                    .with_details(json!({ "body_bytes": body_bytes })))
            }
            Some(value) => match value.to_str() {
                Ok(s) if !s.trim().is_empty() => s.to_string(),
                Ok(_) => {
                    return Err(Rejection::new(AdmissionError::MissingSignature)
                        .with_details(json!({ "body_bytes": body_bytes })))
                }
                Err(_) => {
                    return Err(Rejection::new(AdmissionError::InvalidSignature)
                        .with_details(json!({ "reason": "non-ascii signature header" })))
                }
            },
        };

        // Untrusted until the signature verifies
        let document: Value = serde_json::from_slice(raw_body).map_err(|e| {
            Rejection::from_json_error("invalid JSON", &e)
                .with_details(json!({ "body_bytes": body_bytes }))
        })?;

        let claimed_company_id = match document.get("company_id").and_then(Value::as_str) {
            Some(id) if is_well_formed_identifier(id) => id.to_string(),
            Some(_) => {
                return Err(Rejection::new(AdmissionError::MalformedPayload(
                    "company_id is not a valid identifier".to_string(),
                ))
                .with_details(json!({ "body_bytes": body_bytes })))
            }
            None => {
                return Err(Rejection::new(AdmissionError::MalformedPayload(
                    "company_id missing".to_string(),
                ))
                .with_details(json!({ "body_bytes": body_bytes })))
            }
        };

        let tenant = self
            .registry
            .resolve(&claimed_company_id)
            .await
            .map_err(|e| Rejection::new(AdmissionError::Internal(e.to_string())))?
            .ok_or_else(|| {
                Rejection::new(AdmissionError::UnknownTenant)
                    .with_details(json!({ "claimed_company_id": claimed_company_id }))
            })?;

        if let Err(e) = verify_signature(tenant.webhook_secret.expose(), raw_body, &signature) {
            tracing::debug!(claimed_company_id = %claimed_company_id, "Signature rejected: {}", e);
            return Err(Rejection::new(AdmissionError::InvalidSignature).with_details(json!({
                "claimed_company_id": claimed_company_id,
                "reason": e.to_string(),
            })));
        }

        // Authenticated from here on
        // A body that does not fit the schema is not sanitizable field by field
        let payload: CallEventPayload = serde_json::from_slice(raw_body).map_err(|e| {
            Rejection::from_json_error("schema violation", &e)
                .for_tenant(&tenant.tenant_id)
                .with_details(json!({ "body_bytes": body_bytes }))
        })?;
        payload.validate().map_err(|reason| {
            Rejection::new(AdmissionError::MalformedPayload(reason))
                .for_tenant(&tenant.tenant_id)
                .with_details(json!({ "payload": sanitize_value(&document) }))
        })?;

        let active = self
            .registry
            .is_active(&tenant.tenant_id)
            .await
            .map_err(|e| Rejection::new(AdmissionError::Internal(e.to_string())))?;
        if !active {
            return Err(Rejection::new(AdmissionError::InactiveTenant)
                .for_tenant(&tenant.tenant_id)
                .with_details(json!({ "call_id": payload.call_id })));
        }

        if !self.limiter.allow(&tenant.tenant_id, tenant.rate_limit_per_minute) {
            return Err(Rejection::new(AdmissionError::RateLimited)
                .for_tenant(&tenant.tenant_id)
                .with_details(json!({
                    "call_id": payload.call_id,
                    "limit_per_minute": tenant.rate_limit_per_minute,
                })));
        }

        let event = IngestionEvent {
            call_id: payload.call_id.clone(),
            tenant_id: tenant.tenant_id.clone(),
            payload,
            raw_payload: raw_body.to_vec(),
            received_at: Utc::now(),
        };

        Ok(Admission {
            admission_token: Uuid::new_v4(),
            tenant,
            event,
        })
    }

    async fn audit_rejection(&self, rejection: Rejection, source_ip: Option<IpAddr>) -> AdmissionError {
        let Rejection {
            error,
            tenant_id,
            details,
            audit_reason,
        } = rejection;

        match error.audit_type() {
            Some(event_type) => {
                let mut details = match details {
                    Value::Object(map) => Value::Object(map),
                    Value::Null => json!({}),
                    other => json!({ "detail": other }),
                };
                details["reason"] = Value::String(audit_reason.unwrap_or_else(|| error.to_string()));
                self.write_audit(SecurityAuditEvent::new(
                    event_type,
                    tenant_id,
                    source_ip.map(|ip| ip.to_string()),
                    details,
                ))
                .await;
            }
            None => {
                tracing::error!(tenant_id = ?tenant_id, "Admission failed internally: {}", error);
            }
        }

        error
    }

    /// Audit write failures do not change the admission decision
    async fn write_audit(&self, event: SecurityAuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.audit.record(event).await {
            tracing::error!(event_type = %event_type, "Failed to write security audit event: {}", e);
        }
    }
}

/// Value-free description of a JSON error for the audit trail
fn json_error_summary(e: &serde_json::Error) -> String {
    let category = match e.classify() {
        Category::Io => "unreadable body",
        Category::Syntax => "invalid JSON",
        Category::Data => "schema violation",
        Category::Eof => "truncated JSON",
    };
    format!(
        "Malformed payload: {} at line {} column {}",
        category,
        e.line(),
        e.column()
    )
}

fn success_details(admission: &Admission, body_bytes: usize) -> Value {
    match admission.tenant.security_level {
        SecurityLevel::Strict => json!({
            "call_id": admission.event.call_id,
            "body_bytes": body_bytes,
        }),
        SecurityLevel::Standard => {
            let payload = serde_json::to_value(&admission.event.payload).unwrap_or(Value::Null);
            json!({
                "call_id": admission.event.call_id,
                "admission_token": admission.admission_token,
                "body_bytes": body_bytes,
                "payload": sanitize_value(&payload),
            })
        }
    }
}
