//! Webhook signature verification.
//!
//! Senders sign the exact request body with HMAC-SHA256 under a shared secret
//! and send the lowercase hex digest, optionally prefixed with `sha256=`.
//! Verification always runs over the bytes as received; a payload that is
//! re-serialized after parsing will not verify.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm prefix senders may put in front of the digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Result of signature validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the signature is valid.
    pub is_valid: bool,
    /// Why validation failed.
    pub error_message: Option<String>,
}

impl ValidationResult {
    /// Creates a successful validation result.
    pub fn valid() -> Self {
        Self { is_valid: true, error_message: None }
    }

    /// Creates a failed validation result with error message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self { is_valid: false, error_message: Some(message.into()) }
    }
}

/// Signature computation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The secret cannot key an HMAC.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSecret => write!(f, "invalid secret key"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Checks `signature` against the HMAC-SHA256 of `raw_body` under `secret`.
///
/// Returns `false`, never panics, for an empty signature, an empty secret,
/// a digest of the wrong length, or a mismatch.
///
/// # Example
///
/// ```
/// use tollgate_api::crypto::{generate_hmac_hex, verify};
///
/// let body = br#"{"event_id":"evt_1","event_type":"conversation_started"}"#;
/// let digest = generate_hmac_hex(body, "shared-secret").unwrap();
///
/// assert!(verify(body, &format!("sha256={digest}"), "shared-secret"));
/// assert!(!verify(body, &digest, "other-secret"));
/// ```
pub fn verify(raw_body: &[u8], signature: &str, secret: &str) -> bool {
    verify_signature(raw_body, signature, secret).is_valid
}

/// Like [`verify`], but reports why a signature was refused.
pub fn verify_signature(raw_body: &[u8], signature: &str, secret: &str) -> ValidationResult {
    let provided = signature.trim();
    if provided.is_empty() {
        return ValidationResult::invalid("signature header is empty");
    }

    if secret.is_empty() {
        return ValidationResult::invalid("secret key is empty");
    }

    let provided = provided.strip_prefix(SIGNATURE_PREFIX).unwrap_or(provided);

    let expected = match generate_hmac_hex(raw_body, secret) {
        Ok(digest) => digest,
        Err(err) => return ValidationResult::invalid(err.to_string()),
    };

    if provided.len() != expected.len() {
        return ValidationResult::invalid(format!(
            "signature length {} does not match expected {}",
            provided.len(),
            expected.len()
        ));
    }

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        ValidationResult::valid()
    } else {
        ValidationResult::invalid("signature mismatch")
    }
}

/// Generates the lowercase hex HMAC-SHA256 of `payload` under `secret`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the secret cannot key an HMAC.
pub fn generate_hmac_hex(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
