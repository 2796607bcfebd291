//! Security audit events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Audit event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Success,
    MissingSignature,
    InvalidSignature,
    UnauthorizedTenant,
    RateLimited,
    MalformedPayload,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Success => "success",
            AuditEventType::MissingSignature => "missing_signature",
            AuditEventType::InvalidSignature => "invalid_signature",
            AuditEventType::UnauthorizedTenant => "unauthorized_tenant",
            AuditEventType::RateLimited => "rate_limited",
            AuditEventType::MalformedPayload => "malformed_payload",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditEventType::Success),
            "missing_signature" => Ok(AuditEventType::MissingSignature),
            "invalid_signature" => Ok(AuditEventType::InvalidSignature),
            "unauthorized_tenant" => Ok(AuditEventType::UnauthorizedTenant),
            "rate_limited" => Ok(AuditEventType::RateLimited),
            "malformed_payload" => Ok(AuditEventType::MalformedPayload),
            other => Err(format!("unknown audit event type: {}", other)),
        }
    }
}

/// Immutable record of one admission decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAuditEvent {
    pub event_id: Uuid,
    /// Absent when the tenant was never resolved
    pub tenant_id: Option<String>,
    pub event_type: AuditEventType,
    pub source_ip: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Reason and sanitized payload; never raw bodies or secrets
    pub sanitized_details: Value,
}

impl SecurityAuditEvent {
    pub fn new(
        event_type: AuditEventType,
        tenant_id: Option<String>,
        source_ip: Option<String>,
        sanitized_details: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tenant_id,
            event_type,
            source_ip,
            timestamp: Utc::now(),
            sanitized_details,
        }
    }
}
