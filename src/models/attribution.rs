use serde::{Deserialize, Serialize};

/// Immutable binding of a profile to the profile that referred it.
///
/// At most one row per subject; the first successful bind wins and is never
/// overwritten or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralAttribution {
    pub subject_id: String,
    pub referrer_id: String,
    pub source: AttributionSource,
    /// Optional referrer-specific commission override in basis points,
    /// substituted for the default referrer share at split time.
    pub custom_rate_bp: Option<i64>,
    pub bound_at: i64,
}

/// How the referral signal reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionSource {
    /// Explicit referral code carried as a request parameter.
    Code,
    /// Signed attribution cookie.
    Cookie,
    /// Code typed in manually at signup.
    Manual,
}

impl AttributionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Cookie => "cookie",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for AttributionSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "cookie" => Ok(Self::Cookie),
            "manual" => Ok(Self::Manual),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AttributionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The ordered attribution signals accompanying a signup or first booking.
///
/// Priority: explicit code parameter, then signed cookie token, then a
/// manually entered code. Invalid or expired cookie tokens count as absent,
/// never as errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributionSignals {
    pub code_param: Option<String>,
    pub cookie_token: Option<String>,
    pub manual_code: Option<String>,
}
