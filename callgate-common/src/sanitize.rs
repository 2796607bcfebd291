//! Payload sanitization for audit logging
//!
//! Produces a copy of a webhook payload that is safe to write to logs and the
//! security audit table:
//! - fields whose name matches [`SENSITIVE_FIELD_PATTERNS`] are dropped
//! - fields whose name matches [`PHONE_FIELD_PATTERNS`] are masked to the last
//!   4 digits
//!
//! Matching is case-insensitive substring matching on the field name and is
//! applied recursively through nested objects and arrays. The processing
//! pipeline always works on the original payload; only audit output is
//! sanitized.

use serde_json::{Map, Value};

/// Field-name fragments whose values are removed entirely
pub const SENSITIVE_FIELD_PATTERNS: &[&str] = &[
    "ssn",
    "social_security",
    "credit_card",
    "card_number",
    "cvv",
    "password",
    "passwd",
    "secret",
    "api_key",
    "token",
];

/// Field-name fragments whose values are masked to the last 4 digits
pub const PHONE_FIELD_PATTERNS: &[&str] = &[
    "phone",
    "caller_number",
    "callee_number",
    "caller_id",
    "mobile",
    "msisdn",
];

/// Masked replacement prefix
const MASK: &str = "***";

/// Return true when `field_name` names a sensitive field
pub fn is_sensitive_field(field_name: &str) -> bool {
    let lower = field_name.to_ascii_lowercase();
    SENSITIVE_FIELD_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Return true when `field_name` names a phone-number field
pub fn is_phone_field(field_name: &str) -> bool {
    let lower = field_name.to_ascii_lowercase();
    PHONE_FIELD_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Mask a phone number down to its last 4 digits
///
/// # Examples
///
/// ```
/// use callgate_common::sanitize::mask_phone;
///
/// assert_eq!(mask_phone("+1 (555) 867-5309"), "***5309");
/// assert_eq!(mask_phone("12"), "***");
/// ```
pub fn mask_phone(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return MASK.to_string();
    }
    let last4: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{}", MASK, last4)
}

/// Produce a sanitized deep copy of `value`
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_object(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

fn sanitize_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        if is_sensitive_field(key) {
            continue;
        }
        if is_phone_field(key) {
            out.insert(key.clone(), mask_phone_value(value));
            continue;
        }
        out.insert(key.clone(), sanitize_value(value));
    }
    out
}

fn mask_phone_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_phone(s)),
        Value::Number(n) => Value::String(mask_phone(&n.to_string())),
        Value::Array(items) => Value::Array(items.iter().map(mask_phone_value).collect()),
        Value::Null => Value::Null,
        // Nested structures under a phone-named key are still sanitized
        other => sanitize_value(other),
    }
}
