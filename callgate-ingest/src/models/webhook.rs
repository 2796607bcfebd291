//! Inbound call-event webhook payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest accepted identifier (call id, company id)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Call event as delivered by the telephony provider
///
/// Duplicate keys are rejected by serde's derived deserializer, which closes
/// off parameter-pollution payloads carrying two `company_id` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEventPayload {
    pub call_id: String,
    pub company_id: String,
    /// Call duration in seconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    /// Where the call recording can be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    /// Free-form provider fields, passed through to processing unmodified
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

impl CallEventPayload {
    /// Structural checks beyond what the type system enforces
    pub fn validate(&self) -> Result<(), String> {
        if !is_well_formed_identifier(&self.call_id) {
            return Err("call_id must be a non-empty identifier".to_string());
        }
        if !is_well_formed_identifier(&self.company_id) {
            return Err("company_id must be a non-empty identifier".to_string());
        }
        if let Some(url) = &self.recording_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err("recording_url must be an http(s) URL".to_string());
            }
        }
        Ok(())
    }
}

/// Identifier shape: 1..=128 chars of `[A-Za-z0-9_.:-]`
pub fn is_well_formed_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// A validated, admitted webhook delivery
#[derive(Debug, Clone)]
pub struct IngestionEvent {
    pub call_id: String,
    pub tenant_id: String,
    pub payload: CallEventPayload,
    /// Raw body as received; dropped once the orchestrator takes the event
    pub raw_payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_payload_parses() {
        let payload: CallEventPayload =
            serde_json::from_value(json!({"call_id": "c-1", "company_id": "acme", "duration": 0}))
                .unwrap();
        assert!(payload.validate().is_ok());
        assert!(payload.custom_fields.is_empty());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: Result<CallEventPayload, _> =
            serde_json::from_value(json!({"call_id": "c-1", "company_id": "acme", "duration": -5}));
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_company_id_rejected() {
        let raw = br#"{"call_id":"c-1","company_id":"acme","company_id":"globex","duration":3}"#;
        let result: Result<CallEventPayload, _> = serde_json::from_slice(raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_identifier_shape() {
        assert!(is_well_formed_identifier("CA1234567890abcdef"));
        assert!(is_well_formed_identifier("acme-corp.eu:1"));
        assert!(!is_well_formed_identifier(""));
        assert!(!is_well_formed_identifier("acme' OR '1'='1"));
        assert!(!is_well_formed_identifier("acme;DROP TABLE tenants"));
        assert!(!is_well_formed_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)));
    }

    #[test]
    fn test_recording_url_scheme_checked() {
        let mut payload: CallEventPayload =
            serde_json::from_value(json!({"call_id": "c-1", "company_id": "acme", "duration": 1}))
                .unwrap();
        payload.recording_url = Some("file:///etc/passwd".to_string());
        assert!(payload.validate().is_err());
        payload.recording_url = Some("https://rec.example.com/c-1.wav".to_string());
        assert!(payload.validate().is_ok());
    }
}
