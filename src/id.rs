//! Prefixed ID generation for bookpay entities.
//!
//! All IDs use a `bp_` brand prefix to guarantee collision avoidance with
//! payment processor IDs (`pi_`, `re_`, `po_`, etc.).
//!
//! Format: `bp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "bp_prof_",
    "bp_lst_",
    "bp_bk_",
    "bp_evt_",
    "bp_le_",
    "bp_po_",
    "bp_dl_",
];

/// Validate that a string is a valid bookpay prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `bp_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];

    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in bookpay.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Profile,
    Listing,
    Booking,
    PaymentEvent,
    LedgerEntry,
    Payout,
    DeadLetter,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Profile => "bp_prof",
            Self::Listing => "bp_lst",
            Self::Booking => "bp_bk",
            Self::PaymentEvent => "bp_evt",
            Self::LedgerEntry => "bp_le",
            Self::Payout => "bp_po",
            Self::DeadLetter => "bp_dl",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let id = EntityType::Booking.gen_id();
        assert!(id.starts_with("bp_bk_"));
        // bp_bk_ (6 chars) + 32 hex chars = 38 chars total
        assert_eq!(id.len(), 38);
    }

    #[test]
    fn test_all_prefixes_unique() {
        let prefixes: Vec<&str> = vec![
            EntityType::Profile.prefix(),
            EntityType::Listing.prefix(),
            EntityType::Booking.prefix(),
            EntityType::PaymentEvent.prefix(),
            EntityType::LedgerEntry.prefix(),
            EntityType::Payout.prefix(),
            EntityType::DeadLetter.prefix(),
        ];

        let mut seen = std::collections::HashSet::new();
        for prefix in prefixes {
            assert!(seen.insert(prefix), "Duplicate prefix found: {}", prefix);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let id1 = EntityType::LedgerEntry.gen_id();
        let id2 = EntityType::LedgerEntry.gen_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_is_valid_prefixed_id() {
        assert!(is_valid_prefixed_id("bp_bk_a1b2c3d4e5f6789012345678901234ab"));
        assert!(is_valid_prefixed_id("bp_le_00000000000000000000000000000000"));
        assert!(is_valid_prefixed_id(&EntityType::Payout.gen_id()));
        assert!(is_valid_prefixed_id(&EntityType::Profile.gen_id()));

        assert!(!is_valid_prefixed_id("")); // empty
        assert!(!is_valid_prefixed_id("a1b2c3d4-e5f6-7890-1234-567890123456")); // plain UUID
        assert!(!is_valid_prefixed_id("bp_unknown_a1b2c3d4e5f6789012345678901234ab")); // unknown prefix
        assert!(!is_valid_prefixed_id("bp_bk_a1b2c3d4")); // too short
        assert!(!is_valid_prefixed_id("bp_bk_a1b2c3d4e5f6789012345678901234abcd")); // too long
        assert!(!is_valid_prefixed_id("bp_bk_a1b2c3d4e5f6789012345678901234gg")); // non-hex
        assert!(!is_valid_prefixed_id("bk_a1b2c3d4e5f6789012345678901234ab")); // missing bp_
    }
}
