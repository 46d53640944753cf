use serde::{Deserialize, Serialize};

/// Identity collaborator record. The engine only reads the referral code and
/// uses the ID as a party identifier; everything else about a profile lives
/// outside this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    /// Human-shareable referral code, unique per profile.
    pub referral_code: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProfile {
    pub display_name: String,
    pub referral_code: String,
}

/// Marketplace collaborator record. Read at booking-creation time only; the
/// booking freezes its own price/terms snapshot so later edits here never
/// change an existing booking's financial terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub provider_id: String,
    pub title: String,
    /// Price in minor units (pence/cents).
    pub price_minor: i64,
    /// ISO 4217 currency code, lowercase.
    pub currency: String,
    /// Free-form terms text, snapshotted onto bookings.
    pub terms: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateListing {
    pub provider_id: String,
    pub title: String,
    pub price_minor: i64,
    pub currency: String,
    pub terms: Option<String>,
}
