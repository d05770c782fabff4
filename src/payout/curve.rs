//! Piecewise-linear payout functions and rounding intervals.

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// One endpoint of a payout function piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPoint {
    /// The oracle outcome at this endpoint.
    pub event_outcome: u64,
    /// The offerer's payout at this endpoint, in satoshis.
    pub outcome_payout: u64,
}

/// A linear segment of the payout function between two endpoints.
/// Within a piece the payout is interpolated to the nearest satoshi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFunctionPiece {
    pub left: PayoutPoint,
    pub right: PayoutPoint,
}

impl PayoutFunctionPiece {
    fn evaluate(&self, outcome: u64) -> u64 {
        let x0 = self.left.event_outcome as i128;
        let x1 = self.right.event_outcome as i128;
        let y0 = self.left.outcome_payout as i128;
        let y1 = self.right.outcome_payout as i128;

        // y0 + (x - x0) * slope, rounded half away from zero.
        let num = (outcome as i128 - x0) * (y1 - y0);
        let den = x1 - x0;
        let quot = round_div(num, den);
        (y0 + quot).max(0) as u64
    }
}

fn round_div(num: i128, den: i128) -> i128 {
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    }
}

/// A payout curve over the whole numeric outcome domain, expressed as
/// contiguous linear pieces. A junction outcome belongs to the piece on
/// its right, so each outcome is evaluated by exactly one piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFunction {
    pieces: Vec<PayoutFunctionPiece>,
}

impl PayoutFunction {
    pub fn new(pieces: Vec<PayoutFunctionPiece>) -> Result<Self, Error> {
        if pieces.is_empty() {
            return Err(Error::validation("payout function", "no pieces"));
        }
        for piece in &pieces {
            if piece.left.event_outcome >= piece.right.event_outcome {
                return Err(Error::validation(
                    "payout function",
                    format!(
                        "piece domain [{}, {}] is empty or reversed",
                        piece.left.event_outcome, piece.right.event_outcome
                    ),
                ));
            }
        }
        for pair in pieces.windows(2) {
            if pair[0].right.event_outcome != pair[1].left.event_outcome {
                return Err(Error::validation(
                    "payout function",
                    "pieces are not contiguous",
                ));
            }
        }
        Ok(PayoutFunction { pieces })
    }

    pub fn pieces(&self) -> &[PayoutFunctionPiece] {
        &self.pieces
    }

    /// The inclusive outcome domain `[first.left, last.right]`.
    pub fn domain(&self) -> (u64, u64) {
        (
            self.pieces[0].left.event_outcome,
            self.pieces[self.pieces.len() - 1].right.event_outcome,
        )
    }

    /// The largest payout any endpoint reaches.
    fn max_endpoint_payout(&self) -> u64 {
        self.pieces
            .iter()
            .flat_map(|p| [p.left.outcome_payout, p.right.outcome_payout])
            .max()
            .expect("validated non-empty")
    }

    /// Unrounded payout at an outcome. Junction outcomes evaluate on the
    /// right-hand piece; the final outcome uses the last piece.
    pub fn evaluate(&self, outcome: u64) -> Result<u64, Error> {
        let (lo, hi) = self.domain();
        if outcome < lo || outcome > hi {
            return Err(Error::validation(
                "outcome",
                format!("{} outside payout domain [{}, {}]", outcome, lo, hi),
            ));
        }
        let piece = self
            .pieces
            .iter()
            .find(|p| outcome < p.right.event_outcome)
            .unwrap_or(&self.pieces[self.pieces.len() - 1]);
        Ok(piece.evaluate(outcome))
    }
}

/// A rounding modulus effective from `begin_interval` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingInterval {
    /// First outcome this modulus applies to.
    pub begin_interval: u64,
    /// Payouts are rounded to the nearest multiple of this value.
    pub rounding_mod: u64,
}

/// Breakpointed rounding moduli over the outcome domain. Outcomes before
/// the first breakpoint round to the nearest satoshi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingIntervals {
    pub intervals: Vec<RoundingInterval>,
}

impl RoundingIntervals {
    /// No rounding: every payout is kept to the satoshi.
    pub fn none() -> Self {
        RoundingIntervals { intervals: vec![] }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for interval in &self.intervals {
            if interval.rounding_mod == 0 {
                return Err(Error::validation("rounding intervals", "zero modulus"));
            }
        }
        for pair in self.intervals.windows(2) {
            if pair[0].begin_interval >= pair[1].begin_interval {
                return Err(Error::validation(
                    "rounding intervals",
                    "breakpoints are not strictly increasing",
                ));
            }
        }
        Ok(())
    }

    fn rounding_mod(&self, outcome: u64) -> u64 {
        self.intervals
            .iter()
            .rev()
            .find(|interval| interval.begin_interval <= outcome)
            .map(|interval| interval.rounding_mod)
            .unwrap_or(1)
    }

    /// Round a payout to the modulus in force at `outcome`, half up,
    /// clamped into `[0, total_collateral]`.
    pub fn round(&self, outcome: u64, payout: u64, total_collateral: u64) -> u64 {
        let m = self.rounding_mod(outcome);
        let rounded = payout
            .saturating_add(m / 2)
            .checked_div(m)
            .expect("validated non-zero modulus")
            .saturating_mul(m);
        rounded.min(total_collateral)
    }
}

/// A maximal run of consecutive outcomes sharing one rounded payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRange {
    /// The offerer's rounded payout across the run.
    pub payout: u64,
    /// First outcome of the run, inclusive.
    pub index_from: u64,
    /// Last outcome of the run, inclusive.
    pub index_to: u64,
}

/// Evaluate and round the payout function over `[0, nb_outcomes)`,
/// producing the ordered equal-payout ranges. The result is a partition:
/// every outcome is in exactly one range, with no gaps or overlaps.
///
/// Runs are located by binary search inside stretches where the rounded
/// curve is monotone (one linear piece under one rounding modulus), so
/// the cost scales with the number of distinct payout levels rather than
/// the domain size.
pub fn compute_payout_ranges(
    function: &PayoutFunction,
    total_collateral: Amount,
    rounding: &RoundingIntervals,
    nb_outcomes: u64,
) -> Result<Vec<PayoutRange>, Error> {
    rounding.validate()?;
    let total = total_collateral.to_sat();
    if function.domain() != (0, nb_outcomes - 1) {
        let (lo, hi) = function.domain();
        return Err(Error::validation(
            "payout function",
            format!(
                "domain [{}, {}] does not cover outcomes [0, {}]",
                lo,
                hi,
                nb_outcomes - 1
            ),
        ));
    }
    if function.max_endpoint_payout() > total {
        return Err(Error::validation(
            "payout function",
            "an endpoint payout exceeds total collateral",
        ));
    }

    // Boundaries where monotonicity may break: piece junctions and
    // rounding breakpoints.
    let mut boundaries: Vec<u64> = vec![0];
    boundaries.extend(
        function
            .pieces()
            .iter()
            .map(|piece| piece.left.event_outcome),
    );
    boundaries.extend(
        rounding
            .intervals
            .iter()
            .map(|interval| interval.begin_interval),
    );
    boundaries.retain(|&b| b < nb_outcomes);
    boundaries.sort_unstable();
    boundaries.dedup();

    let rounded = |x: u64| -> Result<u64, Error> {
        Ok(rounding.round(x, function.evaluate(x)?, total))
    };

    let mut ranges: Vec<PayoutRange> = Vec::new();
    for (i, &seg_start) in boundaries.iter().enumerate() {
        let seg_end = boundaries
            .get(i + 1)
            .map(|&next| next - 1)
            .unwrap_or(nb_outcomes - 1);

        let increasing = rounded(seg_end)? >= rounded(seg_start)?;
        let mut x = seg_start;
        while x <= seg_end {
            let value = rounded(x)?;

            // Largest y in [x, seg_end] still rounding to `value`.
            let mut lo = x;
            let mut hi = seg_end;
            while lo < hi {
                let mid = lo + (hi - lo + 1) / 2;
                let at_mid = rounded(mid)?;
                let in_run = if increasing {
                    at_mid <= value
                } else {
                    at_mid >= value
                };
                if in_run {
                    lo = mid;
                } else {
                    hi = mid - 1;
                }
            }

            match ranges.last_mut() {
                Some(last) if last.payout == value && last.index_to + 1 == x => {
                    last.index_to = lo;
                }
                _ => ranges.push(PayoutRange {
                    payout: value,
                    index_from: x,
                    index_to: lo,
                }),
            }
            x = lo + 1;
        }
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_then_linear(strike: u64, cap_outcome: u64, cap_payout: u64) -> PayoutFunction {
        PayoutFunction::new(vec![
            PayoutFunctionPiece {
                left: PayoutPoint {
                    event_outcome: 0,
                    outcome_payout: 0,
                },
                right: PayoutPoint {
                    event_outcome: strike,
                    outcome_payout: 0,
                },
            },
            PayoutFunctionPiece {
                left: PayoutPoint {
                    event_outcome: strike,
                    outcome_payout: 0,
                },
                right: PayoutPoint {
                    event_outcome: cap_outcome,
                    outcome_payout: cap_payout,
                },
            },
        ])
        .unwrap()
    }

    fn assert_partition(ranges: &[PayoutRange], nb_outcomes: u64) {
        assert_eq!(ranges[0].index_from, 0);
        assert_eq!(ranges[ranges.len() - 1].index_to, nb_outcomes - 1);
        for pair in ranges.windows(2) {
            assert_eq!(
                pair[0].index_to + 1,
                pair[1].index_from,
                "gap or overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
            assert_ne!(pair[0].payout, pair[1].payout, "runs must be maximal");
        }
    }

    #[test]
    fn strike_curve_ranges_partition_domain() {
        let nb_outcomes = 1u64 << 17;
        let function = flat_then_linear(4000, nb_outcomes - 1, 996_000);
        let rounding = RoundingIntervals {
            intervals: vec![RoundingInterval {
                begin_interval: 0,
                rounding_mod: 500,
            }],
        };

        let ranges = compute_payout_ranges(
            &function,
            Amount::from_sat(1_000_000),
            &rounding,
            nb_outcomes,
        )
        .unwrap();

        assert_partition(&ranges, nb_outcomes);

        // The zero-payout floor covers the strike region, so outcome 3000
        // falls into the very first range.
        assert_eq!(ranges[0].payout, 0);
        assert!(ranges[0].index_to >= 4000);

        // Every payout is a rounded multiple within the collateral.
        for range in &ranges {
            assert_eq!(range.payout % 500, 0);
            assert!(range.payout <= 1_000_000);
        }

        // ~996000/500 distinct levels, far fewer than 2^17 outcomes.
        assert!(ranges.len() <= 996_000 / 500 + 2);
        assert!(ranges.len() > 1000);
    }

    #[test]
    fn ranges_match_brute_force_on_small_domain() {
        let nb_outcomes = 1u64 << 10;
        let function = flat_then_linear(100, nb_outcomes - 1, 9_900);
        let rounding = RoundingIntervals {
            intervals: vec![
                RoundingInterval {
                    begin_interval: 0,
                    rounding_mod: 25,
                },
                RoundingInterval {
                    begin_interval: 600,
                    rounding_mod: 400,
                },
            ],
        };
        let total = Amount::from_sat(10_000);

        let ranges =
            compute_payout_ranges(&function, total, &rounding, nb_outcomes).unwrap();
        assert_partition(&ranges, nb_outcomes);

        for outcome in 0..nb_outcomes {
            let expected =
                rounding.round(outcome, function.evaluate(outcome).unwrap(), 10_000);
            let range = ranges
                .iter()
                .find(|r| r.index_from <= outcome && outcome <= r.index_to)
                .expect("partition covers outcome");
            assert_eq!(range.payout, expected, "at outcome {}", outcome);
        }
    }

    #[test]
    fn rejects_curve_exceeding_collateral() {
        let function = flat_then_linear(10, 31, 20_000);
        let result = compute_payout_ranges(
            &function,
            Amount::from_sat(10_000),
            &RoundingIntervals::none(),
            32,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_partial_domain() {
        let function = flat_then_linear(10, 30, 100);
        let result = compute_payout_ranges(
            &function,
            Amount::from_sat(1_000),
            &RoundingIntervals::none(),
            32,
        );
        assert!(result.is_err());
    }

    #[test]
    fn junction_outcome_uses_right_hand_piece() {
        // Discontinuous at 16: flat 0 on the left, flat 1000 on the right.
        let function = PayoutFunction::new(vec![
            PayoutFunctionPiece {
                left: PayoutPoint {
                    event_outcome: 0,
                    outcome_payout: 0,
                },
                right: PayoutPoint {
                    event_outcome: 16,
                    outcome_payout: 0,
                },
            },
            PayoutFunctionPiece {
                left: PayoutPoint {
                    event_outcome: 16,
                    outcome_payout: 1000,
                },
                right: PayoutPoint {
                    event_outcome: 31,
                    outcome_payout: 1000,
                },
            },
        ])
        .unwrap();

        assert_eq!(function.evaluate(15).unwrap(), 0);
        assert_eq!(function.evaluate(16).unwrap(), 1000);

        let ranges = compute_payout_ranges(
            &function,
            Amount::from_sat(1_000),
            &RoundingIntervals::none(),
            32,
        )
        .unwrap();
        assert_eq!(
            ranges,
            vec![
                PayoutRange {
                    payout: 0,
                    index_from: 0,
                    index_to: 15
                },
                PayoutRange {
                    payout: 1000,
                    index_from: 16,
                    index_to: 31
                },
            ]
        );
    }
}
