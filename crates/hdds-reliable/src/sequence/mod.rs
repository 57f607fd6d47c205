// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence numbers and the range structures built on them.
//!
//! - [`SequenceNumber`] - signed 64-bit stream position (plain integer order)
//! - [`SequenceRange`] - inclusive `(first, second)` pair
//! - [`OrderedRanges`] - sorted set of disjoint, non-adjacent ranges
//! - [`DisjointSequence`] - received/acknowledged tracking with RTPS bitmaps

mod disjoint;
mod ordered_ranges;

pub use disjoint::{BitmapResult, DisjointSequence, MAX_BITMAP_LONGS};
pub use ordered_ranges::{OrderedRanges, RangeValue};

use std::fmt;
use std::ops::{Add, Sub};

/// Position of a sample or packet in a reliable stream.
///
/// Ordering is plain integer ordering; no rollover arithmetic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Zero, the value before the first valid sequence.
    pub const ZERO: SequenceNumber = SequenceNumber(0);
    /// First valid sequence number.
    pub const MIN_VALUE: SequenceNumber = SequenceNumber(1);
    /// Largest representable sequence number.
    pub const MAX_VALUE: SequenceNumber = SequenceNumber(i64::MAX);
    /// SEQUENCENUMBER_UNKNOWN (high = -1, low = 0).
    pub const UNKNOWN: SequenceNumber = SequenceNumber(-(1i64 << 32));

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    /// Following value, saturating at `MAX_VALUE`.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Preceding value, saturating at `i64::MIN`.
    pub fn previous(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// RTPS wire split: (high, low).
    pub fn to_high_low(self) -> (i32, u32) {
        ((self.0 >> 32) as i32, self.0 as u32)
    }

    pub fn from_high_low(high: i32, low: u32) -> Self {
        Self(((high as i64) << 32) | low as i64)
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Add<i64> for SequenceNumber {
    type Output = SequenceNumber;

    fn add(self, rhs: i64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub<i64> for SequenceNumber {
    type Output = SequenceNumber;

    fn sub(self, rhs: i64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

impl Sub for SequenceNumber {
    type Output = i64;

    fn sub(self, rhs: SequenceNumber) -> i64 {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive range of sequence numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SequenceRange {
    pub first: SequenceNumber,
    pub second: SequenceNumber,
}

impl SequenceRange {
    pub fn new(first: impl Into<SequenceNumber>, second: impl Into<SequenceNumber>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Single-value range.
    pub fn single(value: impl Into<SequenceNumber>) -> Self {
        let v = value.into();
        Self {
            first: v,
            second: v,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.first <= self.second
    }

    pub fn contains(&self, value: SequenceNumber) -> bool {
        self.first <= value && value <= self.second
    }
}

impl From<(i64, i64)> for SequenceRange {
    fn from((first, second): (i64, i64)) -> Self {
        Self::new(first, second)
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.second {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.second)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_neighbours() {
        assert_eq!(SequenceNumber::MAX_VALUE.next(), SequenceNumber::MAX_VALUE);
        assert_eq!(SequenceNumber::new(5).previous(), SequenceNumber::new(4));
        assert_eq!(SequenceNumber::new(5) + 3, SequenceNumber::new(8));
        assert_eq!(SequenceNumber::new(9) - SequenceNumber::new(4), 5);
    }

    #[test]
    fn test_high_low_split() {
        let (high, low) = SequenceNumber::UNKNOWN.to_high_low();
        assert_eq!((high, low), (-1, 0));
        assert_eq!(SequenceNumber::from_high_low(-1, 0), SequenceNumber::UNKNOWN);
        let sn = SequenceNumber::new((7i64 << 32) | 42);
        let (h, l) = sn.to_high_low();
        assert_eq!(SequenceNumber::from_high_low(h, l), sn);
    }

    #[test]
    fn test_range_display() {
        assert_eq!(SequenceRange::new(3, 3).to_string(), "3");
        assert_eq!(SequenceRange::new(3, 7).to_string(), "3-7");
        assert!(!SequenceRange::new(50, 40).is_valid());
    }
}
