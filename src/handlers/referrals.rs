//! Referral links, signup attribution, and the referrer lookup.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};

use crate::attribution;
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    AttributionSignals, CreateProfile, Profile, ReferralAttribution,
};

/// Cookie carrying the signed attribution token.
const ATTRIBUTION_COOKIE: &str = "bp_ref";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/referrals/links", post(create_referral_link))
        .route("/referrals/visit", get(visit_referral_link))
        .route("/signups", post(signup))
        .route("/profiles/{id}/referrer", get(get_referrer))
}

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    pub referrer_id: String,
}

#[derive(Serialize)]
pub struct CreateLinkResponse {
    pub token: String,
    pub link: String,
}

/// Issue a signed attribution token and a shareable visit link for it.
pub async fn create_referral_link(
    State(state): State<AppState>,
    Json(input): Json<CreateLinkRequest>,
) -> Result<Json<CreateLinkResponse>> {
    let conn = state.db.get()?;
    if queries::get_profile_by_id(&conn, &input.referrer_id)?.is_none() {
        return Err(AppError::NotFound(format!("profile {}", input.referrer_id)));
    }

    let token = state.tokens.generate(&input.referrer_id);
    let link = format!("{}/referrals/visit?token={}", state.base_url, token);
    Ok(Json(CreateLinkResponse { token, link }))
}

#[derive(Deserialize)]
pub struct VisitQuery {
    pub token: String,
}

/// Land a referral link: drop the signed token into the attribution cookie
/// and send the visitor on. The token is not validated here - a damaged one
/// simply resolves as an absent signal at signup time.
pub async fn visit_referral_link(
    State(state): State<AppState>,
    Query(query): Query<VisitQuery>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let cookie = Cookie::build((ATTRIBUTION_COOKIE, query.token))
        .path("/")
        .http_only(true)
        .build();
    (jar.add(cookie), Redirect::to(&state.base_url))
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub display_name: String,
    /// The new profile's own shareable referral code.
    pub referral_code: String,
    /// Referral code entered manually at signup (priority 3).
    pub manual_code: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct SignupQuery {
    /// Explicit referral code parameter (priority 1).
    #[serde(rename = "ref")]
    pub ref_code: Option<String>,
}

#[derive(Serialize)]
pub struct SignupResponse {
    pub profile: Profile,
    pub attribution: Option<ReferralAttribution>,
}

/// Create a profile and bind its referral attribution once.
///
/// Signals in priority order: the `ref` query parameter, the signed
/// attribution cookie, the manually entered code. An invalid cookie is an
/// absent signal; no signal at all is a normal signup.
pub async fn signup(
    State(state): State<AppState>,
    Query(query): Query<SignupQuery>,
    jar: CookieJar,
    Json(input): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>)> {
    if input.display_name.trim().is_empty() || input.referral_code.trim().is_empty() {
        return Err(AppError::Validation(
            "display_name and referral_code are required".into(),
        ));
    }

    let conn = state.db.get()?;

    if queries::get_profile_by_referral_code(&conn, &input.referral_code)?.is_some() {
        return Err(AppError::Conflict(format!(
            "referral code {} is taken",
            input.referral_code
        )));
    }

    let profile = queries::create_profile(
        &conn,
        &CreateProfile {
            display_name: input.display_name.clone(),
            referral_code: input.referral_code.clone(),
        },
    )?;

    let signals = AttributionSignals {
        code_param: query.ref_code,
        cookie_token: jar.get(ATTRIBUTION_COOKIE).map(|c| c.value().to_string()),
        manual_code: input.manual_code,
    };

    let bound = attribution::resolve_and_bind(&conn, &state.tokens, &profile.id, &signals)?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            profile,
            attribution: bound,
        }),
    ))
}

#[derive(Serialize)]
pub struct ReferrerResponse {
    pub referrer: Option<Profile>,
}

/// `referrer_of` lookup for the onboarding/signup collaborator.
pub async fn get_referrer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReferrerResponse>> {
    let conn = state.db.get()?;
    if queries::get_profile_by_id(&conn, &id)?.is_none() {
        return Err(AppError::NotFound(format!("profile {}", id)));
    }
    let referrer = attribution::referrer_of(&conn, &id)?;
    Ok(Json(ReferrerResponse { referrer }))
}
