//! Inbound webhook signature verification.
//!
//! The processor signs each delivery with a header of the form
//! `t=<unix>,v1=<hex hmac-sha256>` where the MAC covers `"{t}.{body}"` under
//! the shared secret. Verification enforces a timestamp tolerance window and
//! compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook timestamp before it's rejected (in seconds).
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Clock skew tolerance for timestamps from the future (in seconds).
const FUTURE_SKEW_TOLERANCE_SECS: i64 = 60;

/// Verify an event signature header against the shared secret.
///
/// Returns `Ok(false)` for a well-formed header that doesn't match (wrong
/// secret, tampered payload, stale timestamp); `Err` for a structurally
/// invalid header. Callers treat both as a rejected signature.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    let mut timestamp = None;
    let mut sig_v1 = None;

    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let timestamp_str = timestamp.ok_or(AppError::InvalidSignature)?;
    let sig_v1 = sig_v1.ok_or(AppError::InvalidSignature)?;

    // Reject stale timestamps to bound the replay window.
    let timestamp: i64 = timestamp_str.parse().map_err(|_| AppError::InvalidSignature)?;

    let now = chrono::Utc::now().timestamp();
    let age = now - timestamp;

    if age > TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }

    if age < -FUTURE_SKEW_TOLERANCE_SECS {
        tracing::warn!("Webhook rejected: timestamp in the future (age={}s)", age);
        return Ok(false);
    }

    let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison. Length is not secret - the signature is
    // always 64 hex chars for SHA-256.
    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}
