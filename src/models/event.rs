use serde::{Deserialize, Serialize};

/// Raw webhook envelope from the payment processor.
///
/// `event_id` is the processor's globally unique event identifier and is the
/// idempotency key; the payload under `data` is parsed according to
/// `event_type`.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "id")]
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Parsed payment processor event with engine-typed data.
#[derive(Debug)]
pub enum PaymentEventKind {
    /// Funds captured for a booking - confirms it and writes the commission split.
    PaymentSucceeded {
        booking_id: String,
        amount_minor: i64,
        currency: String,
    },
    /// Full or partial refund for a booking - appends compensating entries.
    PaymentRefunded {
        booking_id: String,
        amount_minor: i64,
        currency: String,
    },
    /// A previously requested payout settled.
    PayoutCompleted { payout_id: String },
    /// A previously requested payout bounced; funds return to available.
    PayoutFailed {
        payout_id: String,
        reason: Option<String>,
    },
    /// Event type not relevant to this engine.
    Ignored,
}

/// Persisted record of a processed payment event (the idempotency log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventRecord {
    pub id: String,
    pub external_event_id: String,
    pub kind: String,
    pub booking_id: Option<String>,
    pub payout_id: Option<String>,
    /// Signed gross amount of this event in minor units (negative for refunds).
    pub gross_minor: i64,
    pub processed_at: i64,
}

/// A failed event held for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    pub id: String,
    pub external_event_id: Option<String>,
    /// Raw payload bytes as received, so replay goes through the same parser.
    pub payload: String,
    pub error: String,
    pub severity: DeadLetterSeverity,
    pub attempts: i64,
    pub created_at: i64,
    pub replayed_at: Option<i64>,
}

/// Whether a dead-lettered event is eligible for automatic replay or needs a
/// human first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterSeverity {
    Transient,
    /// Mandatory human review, e.g. a detected ledger invariant violation.
    Fatal,
}

impl DeadLetterSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

impl std::str::FromStr for DeadLetterSeverity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "fatal" => Ok(Self::Fatal),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DeadLetterSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
