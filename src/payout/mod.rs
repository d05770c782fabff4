//! Payout curve evaluation, rounding, and the digit-prefix grouping which
//! compresses a numeric outcome domain into a small set of CETs.

mod curve;
mod groups;

pub use curve::{
    compute_payout_ranges, PayoutFunction, PayoutFunctionPiece, PayoutPoint, PayoutRange,
    RoundingInterval, RoundingIntervals,
};
pub use groups::group_by_ignoring_digits;
pub(crate) use groups::decompose_value;

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A settlement split between the two parties. Every payout of a contract
/// conserves collateral: `offer + accept` equals the total collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Amount paid to the offering party.
    pub offer: Amount,
    /// Amount paid to the accepting party.
    pub accept: Amount,
}

impl Payout {
    /// Split `total_collateral` by paying the offerer `offer` and the
    /// acceptor the remainder. The payout curve's raw value is always the
    /// offerer's amount; the acceptor holds the complement.
    pub fn from_offer_amount(offer: Amount, total_collateral: Amount) -> Result<Payout, Error> {
        let accept = total_collateral.checked_sub(offer).ok_or_else(|| {
            Error::validation(
                "payout",
                format!("offer payout {} exceeds total collateral", offer),
            )
        })?;
        Ok(Payout { offer, accept })
    }

    /// The collateral this payout distributes.
    pub fn total(&self) -> Amount {
        self.offer + self.accept
    }
}

/// The set of oracle outcomes one CET covers, in terms of what the
/// oracle actually signs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeClaim {
    /// One label of an enumerated event.
    Enumerated(String),

    /// All numeric outcomes sharing this digit prefix. A full-length
    /// prefix pins a single outcome; shorter prefixes wildcard the
    /// remaining digits.
    DigitPrefix(Vec<u16>),
}

/// Everything needed to build and adaptor-sign one CET: the settlement
/// split and the outcome group that unlocks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CetSpec {
    /// The settlement split this CET pays.
    pub payout: Payout,
    /// The outcome group whose attestation unlocks this CET.
    pub claim: OutcomeClaim,
}

/// Expand a numeric payout curve into the ordered CET list: evaluate and
/// round the curve into equal-payout ranges, then decompose each range
/// into minimal digit-prefix groups. Range order, then grouping order,
/// defines the shared CET index space both parties must agree on.
pub fn numeric_cet_specs(
    function: &PayoutFunction,
    total_collateral: Amount,
    rounding: &RoundingIntervals,
    base: u16,
    nb_digits: u16,
) -> Result<Vec<CetSpec>, Error> {
    let domain = (base as u64)
        .checked_pow(nb_digits as u32)
        .ok_or_else(|| Error::validation("contract descriptor", "outcome domain overflows u64"))?;

    let ranges = compute_payout_ranges(function, total_collateral, rounding, domain)?;

    let mut specs = Vec::new();
    for range in &ranges {
        let payout = Payout::from_offer_amount(Amount::from_sat(range.payout), total_collateral)?;
        for digits in group_by_ignoring_digits(range.index_from, range.index_to, base, nb_digits)? {
            specs.push(CetSpec {
                payout,
                claim: OutcomeClaim::DigitPrefix(digits),
            });
        }
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payout_conserves_collateral() {
        let total = Amount::from_sat(1_000_000);
        let payout = Payout::from_offer_amount(Amount::from_sat(250_000), total).unwrap();
        assert_eq!(payout.offer + payout.accept, total);
        assert!(Payout::from_offer_amount(Amount::from_sat(1_000_001), total).is_err());
    }

    #[test]
    fn numeric_specs_conserve_and_cover() {
        // 0 below 10, then linear up to the domain edge.
        let total = Amount::from_sat(10_000);
        let function = PayoutFunction::new(vec![
            PayoutFunctionPiece {
                left: PayoutPoint {
                    event_outcome: 0,
                    outcome_payout: 0,
                },
                right: PayoutPoint {
                    event_outcome: 10,
                    outcome_payout: 0,
                },
            },
            PayoutFunctionPiece {
                left: PayoutPoint {
                    event_outcome: 10,
                    outcome_payout: 0,
                },
                right: PayoutPoint {
                    event_outcome: 31,
                    outcome_payout: 10_000,
                },
            },
        ])
        .unwrap();

        let specs = numeric_cet_specs(&function, total, &RoundingIntervals::none(), 2, 5).unwrap();
        assert!(!specs.is_empty());
        for spec in &specs {
            assert_eq!(spec.payout.total(), total);
        }

        // Every outcome of the 2^5 domain is covered by exactly one claim.
        for outcome in 0u64..32 {
            let digits = decompose_value(outcome, 2, 5).unwrap();
            let covering = specs
                .iter()
                .filter(|spec| match &spec.claim {
                    OutcomeClaim::DigitPrefix(prefix) => digits[..prefix.len()] == prefix[..],
                    OutcomeClaim::Enumerated(_) => false,
                })
                .count();
            assert_eq!(covering, 1, "outcome {} covered {} times", outcome, covering);
        }
    }
}
