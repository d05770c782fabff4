//! Digit-prefix decomposition of outcome ranges.
//!
//! A numeric oracle signs one message per digit, so a CET can cover every
//! outcome sharing a digit prefix by aggregating just that prefix's
//! signature points. Covering a payout range with the fewest such
//! prefixes is what keeps the CET count far below the domain size.

use crate::errors::Error;

/// Big-endian digits of `value` in the given base, zero-padded to
/// `nb_digits`. `None` if the value does not fit the domain.
pub(crate) fn decompose_value(value: u64, base: u16, nb_digits: u16) -> Option<Vec<u16>> {
    let base = base as u64;
    let mut digits = vec![0u16; nb_digits as usize];
    let mut rest = value;
    for slot in digits.iter_mut().rev() {
        *slot = (rest % base) as u16;
        rest /= base;
    }
    if rest != 0 {
        return None;
    }
    Some(digits)
}

/// Decompose the inclusive outcome range `[start, end]` into the minimal
/// ordered set of digit-prefix groups: each group is a fixed prefix of
/// digits, wildcarding the rest.
///
/// Groups are emitted in ascending numeric order, always aligned to the
/// most significant digit boundary possible, so both parties derive an
/// identical CET list. A single-outcome range yields one full-length
/// group; the whole domain yields one group per leading digit (a CET must
/// commit to at least one signed digit).
pub fn group_by_ignoring_digits(
    start: u64,
    end: u64,
    base: u16,
    nb_digits: u16,
) -> Result<Vec<Vec<u16>>, Error> {
    if base < 2 {
        return Err(Error::validation("digit grouping", "base below 2"));
    }
    let span = (base as u64)
        .checked_pow(nb_digits as u32)
        .ok_or_else(|| Error::validation("digit grouping", "domain overflows u64"))?;
    if start > end || end >= span {
        return Err(Error::validation(
            "digit grouping",
            format!("range [{}, {}] invalid for domain size {}", start, end, span),
        ));
    }

    let mut groups = Vec::new();
    let mut prefix = Vec::with_capacity(nb_digits as usize);
    cover(&mut groups, &mut prefix, 0, span, start, end, base as u64);
    Ok(groups)
}

/// Emit the largest whole digit-subtrees lying inside `[start, end]`.
/// `lo` and `span` describe the subtree reached via `prefix`.
fn cover(
    groups: &mut Vec<Vec<u16>>,
    prefix: &mut Vec<u16>,
    lo: u64,
    span: u64,
    start: u64,
    end: u64,
    base: u64,
) {
    if !prefix.is_empty() && lo >= start && lo + (span - 1) <= end {
        groups.push(prefix.clone());
        return;
    }

    let child_span = span / base;
    for digit in 0..base {
        let child_lo = lo + digit * child_span;
        let child_hi = child_lo + (child_span - 1);
        if child_hi < start || child_lo > end {
            continue;
        }
        prefix.push(digit as u16);
        cover(groups, prefix, child_lo, child_span, start, end, base);
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The value range a prefix group covers.
    fn group_bounds(group: &[u16], base: u64, nb_digits: u16) -> (u64, u64) {
        let span = base.pow((nb_digits as usize - group.len()) as u32);
        let lo = group.iter().fold(0u64, |acc, &d| acc * base + d as u64) * span;
        (lo, lo + span - 1)
    }

    fn assert_exact_cover(groups: &[Vec<u16>], start: u64, end: u64, base: u64, nb_digits: u16) {
        let mut covered = 0u64;
        let mut previous_end: Option<u64> = None;
        for group in groups {
            let (lo, hi) = group_bounds(group, base, nb_digits);
            assert!(lo >= start && hi <= end, "group {:?} leaks the range", group);
            if let Some(prev) = previous_end {
                assert_eq!(prev + 1, lo, "groups out of order or overlapping");
            } else {
                assert_eq!(lo, start, "first group must start the range");
            }
            previous_end = Some(hi);
            covered += hi - lo + 1;
        }
        assert_eq!(previous_end, Some(end), "last group must end the range");
        assert_eq!(covered, end - start + 1);
    }

    #[test]
    fn known_decimal_vector() {
        let groups = group_by_ignoring_digits(123, 456, 10, 3).unwrap();
        assert_exact_cover(&groups, 123, 456, 10, 3);

        // [123..129] digit-by-digit, [13x..19x], [2xx..3xx], [40x..44x],
        // [450..456] digit-by-digit.
        assert_eq!(groups.len(), 7 + 7 + 2 + 5 + 7);
        assert_eq!(groups[0], vec![1, 2, 3]);
        assert_eq!(groups[7], vec![1, 3]);
        assert_eq!(groups[14], vec![2]);
        assert_eq!(groups[15], vec![3]);
        assert_eq!(groups[16], vec![4, 0]);
        assert_eq!(groups[groups.len() - 1], vec![4, 5, 6]);
    }

    #[test]
    fn single_outcome_yields_full_length_group() {
        let groups = group_by_ignoring_digits(13, 13, 2, 5).unwrap();
        assert_eq!(groups, vec![vec![0, 1, 1, 0, 1]]);
    }

    #[test]
    fn whole_domain_splits_at_first_digit() {
        let groups = group_by_ignoring_digits(0, 31, 2, 5).unwrap();
        assert_eq!(groups, vec![vec![0], vec![1]]);

        let groups = group_by_ignoring_digits(0, 999, 10, 3).unwrap();
        assert_eq!(groups.len(), 10);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn domain_boundaries_included_once() {
        let groups = group_by_ignoring_digits(0, 30, 2, 5).unwrap();
        assert_exact_cover(&groups, 0, 30, 2, 5);

        let groups = group_by_ignoring_digits(1, 31, 2, 5).unwrap();
        assert_exact_cover(&groups, 1, 31, 2, 5);
    }

    #[test]
    fn exhaustive_small_domain() {
        // Every range of a 3^3 domain must be covered exactly, in order,
        // and by maximal subtrees.
        let nb_digits = 3u16;
        let base = 3u64;
        let span = base.pow(nb_digits as u32);
        for start in 0..span {
            for end in start..span {
                let groups =
                    group_by_ignoring_digits(start, end, base as u16, nb_digits).unwrap();
                assert_exact_cover(&groups, start, end, base, nb_digits);

                // Maximality: no two sibling runs of `base` consecutive
                // same-length groups could have been merged upward.
                for group in &groups {
                    if group.len() < nb_digits as usize {
                        let (lo, hi) = group_bounds(group, base, nb_digits);
                        let parent_span = (hi - lo + 1) * base;
                        let parent_lo = lo / parent_span * parent_span;
                        let inside =
                            parent_lo >= start && parent_lo + parent_span - 1 <= end;
                        assert!(
                            !inside || group.len() == 1,
                            "group {:?} should have merged into its parent",
                            group
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_out_of_domain_ranges() {
        assert!(group_by_ignoring_digits(0, 32, 2, 5).is_err());
        assert!(group_by_ignoring_digits(5, 4, 2, 5).is_err());
    }

    #[test]
    fn decompose_round_trips() {
        assert_eq!(decompose_value(11, 2, 5), Some(vec![0, 1, 0, 1, 1]));
        assert_eq!(decompose_value(456, 10, 3), Some(vec![4, 5, 6]));
        assert_eq!(decompose_value(1000, 10, 3), None);
    }
}
