//! Signed attribution tokens.
//!
//! A token binds a referrer ID to a nonce and an issue timestamp, signed with
//! HMAC-SHA256 so it can travel through an untrusted cookie without being
//! forged or re-pointed at a different referrer.
//!
//! Wire format: `base64url(referrer_id:nonce:issued_at)` || "." || `base64url(hmac)`
//!
//! Validation accepts the current secret and, during key rotation, the
//! previous one. Expiry is enforced from `issued_at` against a configured
//! window.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    /// Structural damage, truncation, or a signature that matches no known secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Correctly signed but issued outside the configured validity window.
    #[error("token expired")]
    Expired,
}

/// Issues and validates signed attribution tokens.
///
/// Cheaply cloneable; held in `AppState`.
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
    previous_secret: Option<Vec<u8>>,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, previous_secret: Option<&str>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            previous_secret: previous_secret.map(|s| s.as_bytes().to_vec()),
            ttl_secs,
        }
    }

    /// Generate a token for a referrer at the current time.
    pub fn generate(&self, referrer_id: &str) -> String {
        self.generate_at(referrer_id, chrono::Utc::now().timestamp())
    }

    /// Generate a token with an explicit issue timestamp.
    pub fn generate_at(&self, referrer_id: &str, issued_at: i64) -> String {
        let nonce = gen_nonce();
        let payload = format!("{}:{}:{}", referrer_id, nonce, issued_at);
        let encoded = BASE64URL.encode(payload.as_bytes());
        let sig = sign(&self.secret, encoded.as_bytes());
        format!("{}.{}", encoded, BASE64URL.encode(sig))
    }

    /// Validate a token and return the referrer ID it was issued for.
    ///
    /// Any structural problem (missing separator, bad base64, malformed
    /// payload) is reported as `InvalidSignature` - a damaged token and a
    /// forged one are indistinguishable to the caller.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    /// Validate against an explicit "now" timestamp.
    pub fn validate_at(&self, token: &str, now: i64) -> Result<String, TokenError> {
        let (encoded, sig_part) = token
            .split_once('.')
            .ok_or(TokenError::InvalidSignature)?;

        let provided_sig = BASE64URL
            .decode(sig_part)
            .map_err(|_| TokenError::InvalidSignature)?;

        // Try the current secret first, then the previous one during rotation.
        let current_ok = verify(&self.secret, encoded.as_bytes(), &provided_sig);
        let previous_ok = !current_ok
            && self
                .previous_secret
                .as_deref()
                .map(|prev| verify(prev, encoded.as_bytes(), &provided_sig))
                .unwrap_or(false);

        if !current_ok && !previous_ok {
            return Err(TokenError::InvalidSignature);
        }

        let payload_bytes = BASE64URL
            .decode(encoded)
            .map_err(|_| TokenError::InvalidSignature)?;
        let payload =
            String::from_utf8(payload_bytes).map_err(|_| TokenError::InvalidSignature)?;

        // payload = referrer_id:nonce:issued_at
        let mut parts = payload.rsplitn(3, ':');
        let issued_at: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(TokenError::InvalidSignature)?;
        let _nonce = parts.next().ok_or(TokenError::InvalidSignature)?;
        let referrer_id = parts.next().ok_or(TokenError::InvalidSignature)?;

        if referrer_id.is_empty() {
            return Err(TokenError::InvalidSignature);
        }

        if now - issued_at > self.ttl_secs {
            return Err(TokenError::Expired);
        }

        Ok(referrer_id.to_string())
    }
}

fn sign(secret: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn verify(secret: &[u8], data: &[u8], provided: &[u8]) -> bool {
    let expected = sign(secret, data);
    // Length mismatch is not secret - HMAC-SHA256 output is always 32 bytes.
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

fn gen_nonce() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
