//! Tenant configuration as served by the tenant registry

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Per-tenant webhook signing secret
///
/// Never printed: `Debug` and `Display` are redacted so a tenant can be
/// logged with `?tenant` safely.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw key bytes for MAC computation
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

impl fmt::Display for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Tenant security level
///
/// `Strict` tenants get payload-free audit details on successful admission
/// (call id and size only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Standard,
    Strict,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Standard => "standard",
            SecurityLevel::Strict => "strict",
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(SecurityLevel::Standard),
            "strict" => Ok(SecurityLevel::Strict),
            other => Err(format!("unknown security level: {}", other)),
        }
    }
}

/// Tenant configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    /// Internal tenant identity
    pub tenant_id: String,
    /// Company id carried by inbound webhooks (unique among active tenants)
    pub external_company_id: String,
    pub is_active: bool,
    pub webhook_secret: WebhookSecret,
    pub rate_limit_per_minute: u32,
    /// Opaque CRM settings handed to the CRM collaborator
    pub crm_config: Value,
    /// Opaque extraction prompts/rules handed to the extraction collaborator
    pub processing_rules: Value,
    /// CRM lead creation is attempted when confidence >= this value
    pub min_confidence_for_crm: f64,
    pub security_level: SecurityLevel,
}

impl Tenant {
    /// CRM gate: inclusive threshold
    pub fn crm_gate_open(&self, confidence: f64) -> bool {
        confidence >= self.min_confidence_for_crm
    }
}
