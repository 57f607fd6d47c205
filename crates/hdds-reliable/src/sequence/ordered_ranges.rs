// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sorted set of disjoint, non-adjacent inclusive ranges.
//!
//! Ranges are keyed by their upper bound so the range that may contain a
//! value `v` is always the first entry whose key is `>= v`.
//!
//! ```text
//!   add(5,7)   -> [5-7]
//!   add(9,9)   -> [5-7] [9]
//!   add(8,8)   -> [5-9]            (adjacent ranges coalesce)
//!   remove(6)  -> [5] [7-9]
//! ```

use std::collections::BTreeMap;

use super::SequenceNumber;

/// Scalar that can be stored in [`OrderedRanges`].
pub trait RangeValue: Copy + Ord + std::fmt::Debug {
    /// Successor, saturating at the maximum.
    fn succ(self) -> Self;
    /// Predecessor, saturating at the minimum.
    fn pred(self) -> Self;
}

impl RangeValue for SequenceNumber {
    fn succ(self) -> Self {
        self.next()
    }

    fn pred(self) -> Self {
        self.previous()
    }
}

macro_rules! impl_range_value {
    ($($t:ty),*) => {
        $(impl RangeValue for $t {
            fn succ(self) -> Self {
                self.saturating_add(1)
            }

            fn pred(self) -> Self {
                self.saturating_sub(1)
            }
        })*
    };
}

impl_range_value!(i64, u32, u64);

/// Ordered collection of inclusive `(lower, upper)` ranges.
///
/// Invariants: every range has `upper >= lower`, and for consecutive ranges
/// `a`, `b`: `b.lower > a.upper + 1` (no overlap, no adjacency).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderedRanges<T: RangeValue> {
    /// upper -> lower
    ranges: BTreeMap<T, T>,
}

impl<T: RangeValue> OrderedRanges<T> {
    pub fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// Collection seeded with a single value.
    pub fn from_value(value: T) -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(value, value);
        Self { ranges }
    }

    /// Insert `[lower, upper]`, coalescing with overlapping or adjacent
    /// ranges. Returns whether the collection changed.
    ///
    /// Callers guarantee `lower <= upper`.
    pub fn add(&mut self, lower: T, upper: T) -> bool {
        debug_assert!(lower <= upper);

        let mut touched: Vec<(T, T)> = Vec::new();
        let reach = upper.succ();
        for (&hi, &lo) in self.ranges.range(lower.pred()..) {
            if lo > reach {
                break;
            }
            touched.push((lo, hi));
        }

        if let [(lo, hi)] = touched.as_slice() {
            if *lo <= lower && *hi >= upper {
                return false;
            }
        }

        let mut new_lower = lower;
        let mut new_upper = upper;
        for (lo, hi) in &touched {
            new_lower = new_lower.min(*lo);
            new_upper = new_upper.max(*hi);
            self.ranges.remove(hi);
        }
        self.ranges.insert(new_upper, new_lower);
        true
    }

    /// Insert a single value.
    pub fn add_value(&mut self, value: T) -> bool {
        self.add(value, value)
    }

    /// Remove one value, splitting its range when the value is interior.
    /// Returns whether the value was present.
    pub fn remove(&mut self, value: T) -> bool {
        let Some((&hi, &lo)) = self.ranges.range(value..).next() else {
            return false;
        };
        if lo > value {
            return false;
        }
        self.ranges.remove(&hi);
        if lo < value {
            self.ranges.insert(value.pred(), lo);
        }
        if value < hi {
            self.ranges.insert(hi, value.succ());
        }
        true
    }

    /// Whether every value of `[lower, upper]` is present.
    pub fn has(&self, lower: T, upper: T) -> bool {
        match self.ranges.range(lower..).next() {
            Some((&hi, &lo)) => lo <= lower && hi >= upper,
            None => false,
        }
    }

    pub fn has_value(&self, value: T) -> bool {
        self.has(value, value)
    }

    /// Whether any value of `[lower, upper]` is present.
    pub fn has_any(&self, lower: T, upper: T) -> bool {
        match self.ranges.range(lower..).next() {
            Some((_, &lo)) => lo <= upper,
            None => false,
        }
    }

    /// Sub-ranges of `[lower, upper]` not currently present, in order.
    pub fn uncovered(&self, lower: T, upper: T) -> Vec<(T, T)> {
        let mut out = Vec::new();
        let mut cursor = lower;
        for (&hi, &lo) in self.ranges.range(lower..) {
            if lo > upper {
                break;
            }
            if lo > cursor {
                out.push((cursor, lo.pred()));
            }
            if hi >= upper {
                return out;
            }
            cursor = hi.succ();
        }
        out.push((cursor, upper));
        out
    }

    /// Remove and return the lowest value.
    pub fn pop_front(&mut self) -> Option<T> {
        let (&hi, &lo) = self.ranges.first_key_value()?;
        if lo == hi {
            self.ranges.remove(&hi);
        } else {
            self.ranges.insert(hi, lo.succ());
        }
        Some(lo)
    }

    /// Lowest range.
    pub fn first(&self) -> Option<(T, T)> {
        self.ranges.first_key_value().map(|(&hi, &lo)| (lo, hi))
    }

    /// Highest range.
    pub fn last(&self) -> Option<(T, T)> {
        self.ranges.last_key_value().map(|(&hi, &lo)| (lo, hi))
    }

    /// Ranges in ascending order as `(lower, upper)`.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (T, T)> + '_ {
        self.ranges.iter().map(|(&hi, &lo)| (lo, hi))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(r: &OrderedRanges<i64>) -> Vec<(i64, i64)> {
        r.iter().collect()
    }

    #[test]
    fn test_add_coalesces_adjacent() {
        let mut r = OrderedRanges::<i64>::new();
        assert!(r.add(5, 7));
        assert!(r.add(9, 9));
        assert_eq!(collect(&r), vec![(5, 7), (9, 9)]);
        assert!(r.add_value(8));
        assert_eq!(collect(&r), vec![(5, 9)]);
        assert!(!r.add(6, 8));
        assert!(r.add(1, 20));
        assert_eq!(collect(&r), vec![(1, 20)]);
    }

    #[test]
    fn test_add_spanning_many() {
        let mut r = OrderedRanges::<i64>::new();
        r.add(1, 2);
        r.add(5, 5);
        r.add(9, 9);
        r.add(20, 22);
        assert!(r.add(4, 12));
        assert_eq!(collect(&r), vec![(1, 2), (4, 12), (20, 22)]);
    }

    #[test]
    fn test_remove_splits() {
        let mut r = OrderedRanges::<i64>::from_value(5);
        r.add(5, 9);
        assert!(r.remove(7));
        assert_eq!(collect(&r), vec![(5, 6), (8, 9)]);
        assert!(r.remove(5));
        assert!(r.remove(9));
        assert_eq!(collect(&r), vec![(6, 6), (8, 8)]);
        assert!(!r.remove(7));
        assert!(!r.remove(100));
    }

    #[test]
    fn test_has_and_has_any() {
        let mut r = OrderedRanges::<i64>::new();
        r.add(3, 5);
        r.add(10, 12);
        assert!(r.has(3, 5));
        assert!(!r.has(3, 6));
        assert!(r.has_value(11));
        assert!(!r.has_value(7));
        assert!(r.has_any(5, 9));
        assert!(r.has_any(0, 3));
        assert!(!r.has_any(6, 9));
        assert!(!r.has_any(13, 20));
    }

    #[test]
    fn test_uncovered() {
        let mut r = OrderedRanges::<i64>::new();
        for v in [2, 5, 6, 9, 10, 11] {
            r.add_value(v);
        }
        assert_eq!(r.uncovered(2, 12), vec![(3, 4), (7, 8), (12, 12)]);
        assert_eq!(r.uncovered(5, 6), Vec::<(i64, i64)>::new());
        assert_eq!(r.uncovered(0, 1), vec![(0, 1)]);
    }

    #[test]
    fn test_pop_front_and_ends() {
        let mut r = OrderedRanges::<i64>::new();
        r.add(1, 2);
        r.add(7, 8);
        assert_eq!(r.first(), Some((1, 2)));
        assert_eq!(r.last(), Some((7, 8)));
        assert_eq!(r.pop_front(), Some(1));
        assert_eq!(r.len(), 2);
        assert!(!r.has_value(1));
        assert!(r.has_value(2));
        assert_eq!(r.pop_front(), Some(2));
        assert_eq!(r.len(), 1);
        r.clear();
        assert!(r.is_empty());
        assert_eq!(r.pop_front(), None);
    }

    #[test]
    fn test_saturating_bounds() {
        let mut r: OrderedRanges<u32> = OrderedRanges::new();
        r.add(0, 0);
        r.add(u32::MAX - 1, u32::MAX);
        assert!(r.remove(0));
        assert!(r.remove(u32::MAX));
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![(u32::MAX - 1, u32::MAX - 1)]);
    }

    #[test]
    fn test_random_matches_bitset() {
        // Mirror every operation in a plain bitset and compare.
        let mut r = OrderedRanges::<i64>::new();
        let mut model = [false; 128];
        for _ in 0..2000 {
            let a = fastrand::i64(0..128);
            let b = (a + fastrand::i64(0..8)).min(127);
            if fastrand::usize(..4) == 0 {
                let was = model[a as usize];
                assert_eq!(r.remove(a), was);
                model[a as usize] = false;
            } else {
                let changed = (a..=b).any(|v| !model[v as usize]);
                assert_eq!(r.add(a, b), changed);
                for v in a..=b {
                    model[v as usize] = true;
                }
            }

            let mut prev: Option<(i64, i64)> = None;
            for (lo, hi) in r.iter() {
                assert!(lo <= hi);
                if let Some((_, phi)) = prev {
                    assert!(lo > phi + 1, "ranges must not touch");
                }
                prev = Some((lo, hi));
            }
            for (v, present) in model.iter().enumerate() {
                assert_eq!(r.has_value(v as i64), *present);
            }
        }
    }
}
