mod attribution;
mod booking;
mod event;
mod ledger;
mod payout;
mod profile;

pub use attribution::{AttributionSignals, AttributionSource, ReferralAttribution};
pub use booking::{Booking, BookingStatus, CreateBooking};
pub use event::{
    DeadLetterEvent, DeadLetterSeverity, EventEnvelope, PaymentEventKind, PaymentEventRecord,
};
pub use ledger::{CreateLedgerEntry, LedgerEntry, LedgerRole, LedgerStatus};
pub use payout::{Payout, PayoutStatus};
pub use profile::{CreateListing, CreateProfile, Listing, Profile};
