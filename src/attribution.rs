//! Referral attribution resolution.
//!
//! Resolves an ordered chain of signals to a referrer: explicit code
//! parameter first, then the signed cookie token, then a manually entered
//! code. A signal that is malformed, expired, unknown, or self-referential is
//! treated as absent and resolution falls through to the next priority; no
//! signal resolving is a normal outcome, not an error.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{AttributionSignals, AttributionSource, Profile, ReferralAttribution};
use crate::token::TokenService;

/// Resolve the attribution signals for a subject.
///
/// Returns the winning referrer ID and which signal produced it, or `None`
/// when nothing resolves.
pub fn resolve(
    conn: &Connection,
    tokens: &TokenService,
    subject_id: &str,
    signals: &AttributionSignals,
) -> Result<Option<(String, AttributionSource)>> {
    // Priority 1: explicit referral code parameter
    if let Some(code) = signals.code_param.as_deref() {
        if let Some(referrer) = resolve_code(conn, subject_id, code)? {
            return Ok(Some((referrer, AttributionSource::Code)));
        }
    }

    // Priority 2: signed cookie token. Validation failure means the signal
    // is absent, never an error surfaced to the caller.
    if let Some(token) = signals.cookie_token.as_deref() {
        match tokens.validate(token) {
            Ok(referrer_id) => {
                if referrer_id != subject_id
                    && queries::get_profile_by_id(conn, &referrer_id)?.is_some()
                {
                    return Ok(Some((referrer_id, AttributionSource::Cookie)));
                }
            }
            Err(e) => {
                tracing::debug!("Attribution cookie ignored: {}", e);
            }
        }
    }

    // Priority 3: manually entered code at signup
    if let Some(code) = signals.manual_code.as_deref() {
        if let Some(referrer) = resolve_code(conn, subject_id, code)? {
            return Ok(Some((referrer, AttributionSource::Manual)));
        }
    }

    Ok(None)
}

/// Resolve signals and bind the winner to the subject, first-write-wins.
///
/// Idempotent: once a subject is bound, later calls leave the original row
/// untouched and return it. Returns `None` when no signal resolves and no
/// prior binding exists.
pub fn resolve_and_bind(
    conn: &Connection,
    tokens: &TokenService,
    subject_id: &str,
    signals: &AttributionSignals,
) -> Result<Option<ReferralAttribution>> {
    if let Some((referrer_id, source)) = resolve(conn, tokens, subject_id, signals)? {
        let bound = queries::bind_attribution(conn, subject_id, &referrer_id, source, None)?;
        if bound {
            tracing::info!(
                "Attribution bound: subject={}, referrer={}, source={}",
                subject_id,
                referrer_id,
                source
            );
        }
    }
    queries::get_attribution(conn, subject_id)
}

/// `referrer_of` collaborator lookup: the profile credited for a subject.
pub fn referrer_of(conn: &Connection, subject_id: &str) -> Result<Option<Profile>> {
    match queries::get_attribution(conn, subject_id)? {
        Some(attribution) => queries::get_profile_by_id(conn, &attribution.referrer_id),
        None => Ok(None),
    }
}

/// A referral code resolves only to a known profile other than the subject.
fn resolve_code(conn: &Connection, subject_id: &str, code: &str) -> Result<Option<String>> {
    match queries::get_profile_by_referral_code(conn, code)? {
        Some(profile) if profile.id != subject_id => Ok(Some(profile.id)),
        _ => Ok(None),
    }
}
