//! Webhook signature calculation and verification
//!
//! # Scheme
//!
//! - Signature = HMAC-SHA256(tenant webhook secret, raw request body)
//! - Transmitted as lowercase or uppercase hex in a single header
//! - Header value may carry an algorithm prefix (`sha256=<hex>`); the prefix is
//!   stripped when present and its absence is accepted
//! - Any other algorithm prefix is rejected
//!
//! The MAC is always computed over the raw bytes as received. Parsing and
//! re-serializing the body changes byte-for-byte equality, so callers must
//! never hand a re-encoded payload to these functions.
//!
//! # Pure Functions
//!
//! This module contains ONLY pure functions. No HTTP framework dependencies
//! (Axum, etc.) - header extraction lives in the service crates.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm prefix accepted on signature header values
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signature verification failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Header present but empty after trimming
    #[error("Signature header is empty")]
    Empty,

    /// Header carries an algorithm other than sha256
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature is not valid hex or has the wrong length
    #[error("Signature is not a hex-encoded SHA-256 MAC")]
    Malformed,

    /// MAC does not match the body
    #[error("Signature mismatch")]
    Mismatch,
}

/// Calculate the hex-encoded HMAC-SHA256 of `body` under `secret`
///
/// # Examples
///
/// ```
/// use callgate_common::signature::compute_signature;
///
/// let sig = compute_signature(b"secret", br#"{"call_id":"c-1"}"#);
/// assert_eq!(sig.len(), 64); // SHA-256 is 64 hex chars
/// ```
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Strip an optional `sha256=` prefix (case-insensitive) from a header value
///
/// Returns the hex part. Values with a different `<algo>=` prefix are
/// reported as unsupported.
pub fn strip_algorithm_prefix(header_value: &str) -> Result<&str, SignatureError> {
    let value = header_value.trim();
    if value.is_empty() {
        return Err(SignatureError::Empty);
    }

    match value.split_once('=') {
        Some((algo, hex_part)) if algo.eq_ignore_ascii_case("sha256") => {
            if hex_part.is_empty() {
                Err(SignatureError::Empty)
            } else {
                Ok(hex_part)
            }
        }
        Some((algo, _)) => Err(SignatureError::UnsupportedAlgorithm(algo.to_string())),
        None => Ok(value),
    }
}

/// Verify a signature header value against the raw body
///
/// Comparison is constant-time (`Mac::verify_slice`).
///
/// # Examples
///
/// ```
/// use callgate_common::signature::{compute_signature, verify_signature};
///
/// let body = br#"{"call_id":"c-1","company_id":"acme","duration":12}"#;
/// let sig = compute_signature(b"whsec", body);
///
/// assert!(verify_signature(b"whsec", body, &sig).is_ok());
/// assert!(verify_signature(b"whsec", body, &format!("sha256={}", sig)).is_ok());
/// assert!(verify_signature(b"other", body, &sig).is_err());
/// ```
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header_value: &str,
) -> Result<(), SignatureError> {
    let hex_part = strip_algorithm_prefix(header_value)?;
    let provided = hex::decode(hex_part).map_err(|_| SignatureError::Malformed)?;
    if provided.len() != 32 {
        return Err(SignatureError::Malformed);
    }

    let mut mac = new_mac(secret);
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

fn new_mac(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length; the error branch is unreachable for Hmac<Sha256>
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any size"),
    }
}

// ========================================
// Tests
// ========================================
