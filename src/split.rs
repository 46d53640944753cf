//! Commission split calculation.
//!
//! The split policy is a plain-data rate table keyed by whether the booking
//! carries a referrer, with an optional per-referrer override rate. The table
//! is passed into the calculation explicitly; nothing here reads ambient
//! state.
//!
//! All arithmetic is integer, in minor units. Platform and referrer shares
//! floor-divide; the recipient takes the remainder, so shares always sum to
//! the gross amount exactly.

use thiserror::Error;

use crate::models::LedgerRole;

/// Basis-point denominator (10000 bp = 100%).
pub const BP_DENOMINATOR: i64 = 10_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SplitError {
    #[error("gross amount must be positive, got {0}")]
    NonPositiveGross(i64),

    #[error("rate {0} bp out of range")]
    RateOutOfRange(i64),

    #[error("refund {refund} exceeds refundable {refundable}")]
    RefundExceedsGross { refund: i64, refundable: i64 },
}

/// Split applied when the booking has no referrer.
#[derive(Debug, Clone, Copy)]
pub struct StandardRates {
    pub recipient_bp: i64,
    pub platform_bp: i64,
}

/// Split applied when the booking carries a bound referrer.
#[derive(Debug, Clone, Copy)]
pub struct ReferredRates {
    pub recipient_bp: i64,
    pub referrer_bp: i64,
    pub platform_bp: i64,
}

/// The full rate table, keyed by `(has_referrer, custom_override)`.
#[derive(Debug, Clone, Copy)]
pub struct RateTable {
    pub standard: StandardRates,
    pub referred: ReferredRates,
}

impl Default for RateTable {
    /// 90/10 without a referrer, 80/10/10 with one.
    fn default() -> Self {
        Self {
            standard: StandardRates {
                recipient_bp: 9_000,
                platform_bp: 1_000,
            },
            referred: ReferredRates {
                recipient_bp: 8_000,
                referrer_bp: 1_000,
                platform_bp: 1_000,
            },
        }
    }
}

/// One party's share of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub role: LedgerRole,
    pub amount_minor: i64,
}

/// Compute the commission split for a gross payment.
///
/// `referrer_rate` is `None` for an unattributed booking, `Some(None)` for a
/// referred booking at the default rate, and `Some(Some(bp))` when the
/// attribution record carries a custom override. The override substitutes for
/// the referrer share only; the recipient absorbs the difference.
pub fn compute_split(
    gross_minor: i64,
    referrer_rate: Option<Option<i64>>,
    table: &RateTable,
) -> Result<Vec<Share>, SplitError> {
    if gross_minor <= 0 {
        return Err(SplitError::NonPositiveGross(gross_minor));
    }

    let shares = match referrer_rate {
        None => {
            let platform = gross_minor * table.standard.platform_bp / BP_DENOMINATOR;
            vec![
                Share {
                    role: LedgerRole::Recipient,
                    amount_minor: gross_minor - platform,
                },
                Share {
                    role: LedgerRole::Platform,
                    amount_minor: platform,
                },
            ]
        }
        Some(custom) => {
            let referrer_bp = custom.unwrap_or(table.referred.referrer_bp);
            if !(0..=BP_DENOMINATOR - table.referred.platform_bp).contains(&referrer_bp) {
                return Err(SplitError::RateOutOfRange(referrer_bp));
            }
            let platform = gross_minor * table.referred.platform_bp / BP_DENOMINATOR;
            let referrer = gross_minor * referrer_bp / BP_DENOMINATOR;
            vec![
                Share {
                    role: LedgerRole::Recipient,
                    amount_minor: gross_minor - platform - referrer,
                },
                Share {
                    role: LedgerRole::Referrer,
                    amount_minor: referrer,
                },
                Share {
                    role: LedgerRole::Platform,
                    amount_minor: platform,
                },
            ]
        }
    };

    debug_assert_eq!(
        shares.iter().map(|s| s.amount_minor).sum::<i64>(),
        gross_minor
    );

    Ok(shares)
}

/// Compute compensating shares for a full or partial refund.
///
/// Each original share is scaled by `refund / gross` (floored); the rounding
/// remainder lands on the recipient share so the compensations sum to exactly
/// `-refund_minor`. `refundable_minor` is the net still refundable for the
/// booking (gross minus prior refunds).
pub fn compute_refund_split(
    original: &[Share],
    gross_minor: i64,
    refund_minor: i64,
    refundable_minor: i64,
) -> Result<Vec<Share>, SplitError> {
    if gross_minor <= 0 {
        return Err(SplitError::NonPositiveGross(gross_minor));
    }
    if refund_minor <= 0 || refund_minor > refundable_minor {
        return Err(SplitError::RefundExceedsGross {
            refund: refund_minor,
            refundable: refundable_minor,
        });
    }

    let mut shares = Vec::with_capacity(original.len());
    let mut assigned = 0i64;
    for share in original {
        if share.role == LedgerRole::Recipient {
            continue;
        }
        let scaled = share.amount_minor * refund_minor / gross_minor;
        assigned += scaled;
        shares.push(Share {
            role: share.role,
            amount_minor: -scaled,
        });
    }

    // Recipient takes the remainder, keeping the total exact.
    shares.insert(
        0,
        Share {
            role: LedgerRole::Recipient,
            amount_minor: -(refund_minor - assigned),
        },
    );

    debug_assert_eq!(
        shares.iter().map(|s| s.amount_minor).sum::<i64>(),
        -refund_minor
    );

    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(shares: &[Share], role: LedgerRole) -> i64 {
        shares
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.amount_minor)
            .unwrap_or(0)
    }

    #[test]
    fn test_standard_split() {
        // A £100 booking with no referrer: recipient £90, platform £10.
        let shares = compute_split(10_000, None, &RateTable::default()).unwrap();
        assert_eq!(amount(&shares, LedgerRole::Recipient), 9_000);
        assert_eq!(amount(&shares, LedgerRole::Platform), 1_000);
        assert_eq!(amount(&shares, LedgerRole::Referrer), 0);
    }

    #[test]
    fn test_referred_split() {
        // A £100 booking with a referrer: recipient £80, referrer £10, platform £10.
        let shares = compute_split(10_000, Some(None), &RateTable::default()).unwrap();
        assert_eq!(amount(&shares, LedgerRole::Recipient), 8_000);
        assert_eq!(amount(&shares, LedgerRole::Referrer), 1_000);
        assert_eq!(amount(&shares, LedgerRole::Platform), 1_000);
    }

    #[test]
    fn test_custom_override_rate() {
        // 20% referrer override: recipient 70, referrer 20, platform 10.
        let shares = compute_split(10_000, Some(Some(2_000)), &RateTable::default()).unwrap();
        assert_eq!(amount(&shares, LedgerRole::Recipient), 7_000);
        assert_eq!(amount(&shares, LedgerRole::Referrer), 2_000);
        assert_eq!(amount(&shares, LedgerRole::Platform), 1_000);
    }

    #[test]
    fn test_split_sums_to_gross_with_awkward_amounts() {
        // Amounts that don't divide evenly still sum to the penny.
        for gross in [1, 3, 99, 101, 9_999, 12_345, 33_333] {
            for referrer in [None, Some(None), Some(Some(333))] {
                let shares = compute_split(gross, referrer, &RateTable::default()).unwrap();
                let total: i64 = shares.iter().map(|s| s.amount_minor).sum();
                assert_eq!(total, gross, "gross={} referrer={:?}", gross, referrer);
            }
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let table = RateTable::default();
        assert_eq!(
            compute_split(0, None, &table),
            Err(SplitError::NonPositiveGross(0))
        );
        assert_eq!(
            compute_split(-100, None, &table),
            Err(SplitError::NonPositiveGross(-100))
        );
        assert_eq!(
            compute_split(10_000, Some(Some(9_500)), &table),
            Err(SplitError::RateOutOfRange(9_500))
        );
        assert_eq!(
            compute_split(10_000, Some(Some(-1)), &table),
            Err(SplitError::RateOutOfRange(-1))
        );
    }

    #[test]
    fn test_full_refund_mirrors_original() {
        let original = compute_split(10_000, Some(None), &RateTable::default()).unwrap();
        let comp = compute_refund_split(&original, 10_000, 10_000, 10_000).unwrap();
        assert_eq!(amount(&comp, LedgerRole::Recipient), -8_000);
        assert_eq!(amount(&comp, LedgerRole::Referrer), -1_000);
        assert_eq!(amount(&comp, LedgerRole::Platform), -1_000);
    }

    #[test]
    fn test_partial_refund_proportional_and_exact() {
        let original = compute_split(10_000, Some(None), &RateTable::default()).unwrap();
        // Refund £33.33 of £100
        let comp = compute_refund_split(&original, 10_000, 3_333, 10_000).unwrap();
        let total: i64 = comp.iter().map(|s| s.amount_minor).sum();
        assert_eq!(total, -3_333);
        assert_eq!(amount(&comp, LedgerRole::Referrer), -333);
        assert_eq!(amount(&comp, LedgerRole::Platform), -333);
        assert_eq!(amount(&comp, LedgerRole::Recipient), -2_667);
    }

    #[test]
    fn test_refund_over_refundable_rejected() {
        let original = compute_split(10_000, None, &RateTable::default()).unwrap();
        // £40 already refunded, only £60 refundable
        let result = compute_refund_split(&original, 10_000, 7_000, 6_000);
        assert_eq!(
            result,
            Err(SplitError::RefundExceedsGross {
                refund: 7_000,
                refundable: 6_000
            })
        );
        assert!(compute_refund_split(&original, 10_000, 0, 10_000).is_err());
    }
}
