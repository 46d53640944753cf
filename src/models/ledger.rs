use serde::{Deserialize, Serialize};

/// An immutable, append-only record of a monetary movement tied to one
/// payment event and one party.
///
/// Amounts are never edited after insert. Status moves through the clearing
/// lifecycle; refunds and reservation splits append compensating rows instead
/// of touching history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub payment_event_id: String,
    pub booking_id: String,
    pub party_id: String,
    pub role: LedgerRole,
    /// Signed amount in minor units. Negative for compensating entries.
    pub amount_minor: i64,
    pub status: LedgerStatus,
    /// When a pending_clearing entry becomes eligible for the sweep.
    pub available_at: i64,
    /// Set while the entry is reserved for a withdrawal.
    pub payout_id: Option<String>,
    pub created_at: i64,
}

/// Which side of the commission split an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRole {
    Recipient,
    Referrer,
    Platform,
}

impl LedgerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recipient => "recipient",
            Self::Referrer => "referrer",
            Self::Platform => "platform",
        }
    }
}

impl std::str::FromStr for LedgerRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recipient" => Ok(Self::Recipient),
            "referrer" => Ok(Self::Referrer),
            "platform" => Ok(Self::Platform),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for LedgerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clearing lifecycle of a ledger entry.
///
/// `pending_clearing -> available -> paid_out`, or `-> reversed` when an
/// entry is annihilated by an equal compensating entry (withdrawal split,
/// payout failure). Reversed entries are excluded from per-event sums; their
/// compensations keep the books balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    PendingClearing,
    Available,
    PaidOut,
    Reversed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingClearing => "pending_clearing",
            Self::Available => "available",
            Self::PaidOut => "paid_out",
            Self::Reversed => "reversed",
        }
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_clearing" => Ok(Self::PendingClearing),
            "available" => Ok(Self::Available),
            "paid_out" => Ok(Self::PaidOut),
            "reversed" => Ok(Self::Reversed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data required to append a ledger entry.
#[derive(Debug, Clone)]
pub struct CreateLedgerEntry {
    pub payment_event_id: String,
    pub booking_id: String,
    pub party_id: String,
    pub role: LedgerRole,
    pub amount_minor: i64,
    pub status: LedgerStatus,
    pub available_at: i64,
    pub payout_id: Option<String>,
}
