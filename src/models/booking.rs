use serde::{Deserialize, Serialize};

/// A reserved service interval with a frozen financial snapshot.
///
/// `price_minor`, `currency`, `terms_snapshot`, and `referrer_id` are copied
/// at creation time and never re-read from the listing or attribution tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub provider_id: String,
    pub customer_id: String,
    pub listing_id: String,
    /// Interval `[starts_at, ends_at)` as Unix timestamps.
    pub starts_at: i64,
    pub ends_at: i64,

    // Frozen snapshot
    pub price_minor: i64,
    pub currency: String,
    pub terms_snapshot: Option<String>,
    /// Referrer credited for this booking, frozen from the customer's
    /// attribution at creation time. None = no attribution.
    pub referrer_id: Option<String>,

    pub status: BookingStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Booking lifecycle. Terminal states are soft - bookings are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Disputed,
    /// Disputed booking settled by refunding the customer.
    Refunded,
    /// Disputed booking settled in the provider's favour.
    Resolved,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
            Self::Refunded => "refunded",
            Self::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "disputed" => Ok(Self::Disputed),
            "refunded" => Ok(Self::Refunded),
            "resolved" => Ok(Self::Resolved),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request payload for creating a booking.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    pub customer_id: String,
    pub listing_id: String,
    pub starts_at: i64,
    pub ends_at: i64,
}
