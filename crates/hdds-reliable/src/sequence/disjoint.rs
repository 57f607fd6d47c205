// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Received/acknowledged sequence tracking.
//!
//! A [`DisjointSequence`] records which sequence numbers have been seen as a
//! set of contiguous ranges. The gaps between ranges are what a reader
//! NACKs; the ranges themselves are what a writer can still resend.
//!
//! # RTPS SequenceNumberSet encoding
//!
//! ```text
//!   present: [1-3] [5] [7-8]          cumulative_ack = 3, base = 4
//!
//!   bit:      0 1 2 3 4
//!   seq:      4 5 6 7 8
//!   normal:   0 1 0 1 1   -> num_bits = 5, 0x58000000
//!   invert:   1 0 1       -> num_bits = 3, 0xA0000000
//! ```
//!
//! Bit 0 is the most significant bit of `bitmap[0]`.
//!
//! # Example
//!
//! ```
//! use hdds_reliable::sequence::{DisjointSequence, SequenceNumber, SequenceRange};
//!
//! let mut seen = DisjointSequence::new();
//! seen.insert(SequenceNumber::new(1));
//! seen.insert(SequenceNumber::new(6));
//! assert!(seen.disjoint());
//! assert_eq!(seen.missing_sequence_ranges(), vec![SequenceRange::new(2, 5)]);
//! ```

use std::fmt;

use super::{OrderedRanges, SequenceNumber, SequenceRange};
use crate::error::{Error, Result};

/// Largest bitmap carried by an RTPS SequenceNumberSet (256 bits).
pub const MAX_BITMAP_LONGS: usize = 8;

/// Widest range accepted by `insert_range`.
const MAX_RANGE_SPAN: i64 = i64::MAX / 2;

/// Outcome of [`DisjointSequence::to_bitmap`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitmapResult {
    /// Bits significant in the bitmap (index of last set bit + 1)
    pub num_bits: u32,
    /// Total bits set
    pub cumulative_bits_added: u32,
    /// Whether the whole span fitted in the bitmap
    pub complete: bool,
}

/// Set of sequence numbers stored as ordered, non-adjacent ranges.
///
/// Empty by default. Ranges coalesce eagerly on insertion, so
/// `disjoint()` is true exactly when a gap exists between `low()` and
/// `high()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisjointSequence {
    ranges: OrderedRanges<SequenceNumber>,
}

impl DisjointSequence {
    pub fn new() -> Self {
        Self {
            ranges: OrderedRanges::new(),
        }
    }

    pub fn reset(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Lowest stored value, `UNKNOWN` when empty.
    pub fn low(&self) -> SequenceNumber {
        self.ranges
            .first()
            .map(|(lo, _)| lo)
            .unwrap_or(SequenceNumber::UNKNOWN)
    }

    /// Highest stored value, `UNKNOWN` when empty.
    pub fn high(&self) -> SequenceNumber {
        self.ranges
            .last()
            .map(|(_, hi)| hi)
            .unwrap_or(SequenceNumber::UNKNOWN)
    }

    /// Upper bound of the lowest contiguous range.
    pub fn cumulative_ack(&self) -> SequenceNumber {
        self.ranges
            .first()
            .map(|(_, hi)| hi)
            .unwrap_or(SequenceNumber::UNKNOWN)
    }

    /// Lower bound of the highest contiguous range.
    pub fn last_ack(&self) -> SequenceNumber {
        self.ranges
            .last()
            .map(|(lo, _)| lo)
            .unwrap_or(SequenceNumber::UNKNOWN)
    }

    /// Whether at least one gap exists.
    pub fn disjoint(&self) -> bool {
        self.ranges.len() > 1
    }

    pub fn contains(&self, value: SequenceNumber) -> bool {
        self.ranges.has_value(value)
    }

    /// Whether any value of `range` is present.
    pub fn contains_any(&self, range: SequenceRange) -> bool {
        range.is_valid() && self.ranges.has_any(range.first, range.second)
    }

    // ========================================================================
    // Insertion / removal
    // ========================================================================

    /// Insert one value. Returns whether the set changed.
    pub fn insert(&mut self, value: SequenceNumber) -> bool {
        self.ranges.add_value(value)
    }

    /// Insert an inclusive range. Returns whether the set changed.
    pub fn insert_range(&mut self, range: SequenceRange) -> Result<bool> {
        validate(range)?;
        Ok(self.ranges.add(range.first, range.second))
    }

    /// Insert an inclusive range, appending to `added` exactly the
    /// sub-ranges that were not already present.
    pub fn insert_range_reporting(
        &mut self,
        range: SequenceRange,
        added: &mut Vec<SequenceRange>,
    ) -> Result<bool> {
        validate(range)?;
        let missing = self.ranges.uncovered(range.first, range.second);
        if missing.is_empty() {
            return Ok(false);
        }
        added.extend(missing.into_iter().map(|(lo, hi)| SequenceRange::new(lo, hi)));
        self.ranges.add(range.first, range.second);
        Ok(true)
    }

    /// Insert the part of `range` that is also present in `filter`.
    pub fn insert_filtered(&mut self, range: SequenceRange, filter: &DisjointSequence) -> Result<bool> {
        validate(range)?;
        let mut changed = false;
        for (lo, hi) in filter.ranges.iter() {
            if hi < range.first {
                continue;
            }
            if lo > range.second {
                break;
            }
            changed |= self.ranges.add(lo.max(range.first), hi.min(range.second));
        }
        Ok(changed)
    }

    /// Insert every range of `other`.
    pub fn merge(&mut self, other: &DisjointSequence) -> bool {
        let mut changed = false;
        for (lo, hi) in other.ranges.iter() {
            changed |= self.ranges.add(lo, hi);
        }
        changed
    }

    /// Decode an RTPS bitmap whose most significant bit of `bits[0]`
    /// stands for `value`. Returns whether the set changed.
    pub fn insert_bitmap(&mut self, value: SequenceNumber, num_bits: u32, bits: &[u32]) -> bool {
        let num_bits = num_bits.min(bits.len() as u32 * 32);
        let mut changed = false;
        let mut open: Option<SequenceNumber> = None;

        let mut i = 0u32;
        while i < num_bits {
            let word = bits[(i / 32) as usize];
            let bit = i % 32;
            if bit == 0 && word == 0 {
                if let Some(start) = open.take() {
                    changed |= self.ranges.add(start, value + (i as i64 - 1));
                }
                i += 32;
                continue;
            }
            let set = word & (0x8000_0000 >> bit) != 0;
            match (set, open) {
                (true, None) => open = Some(value + i as i64),
                (false, Some(start)) => {
                    changed |= self.ranges.add(start, value + (i as i64 - 1));
                    open = None;
                }
                _ => {}
            }
            i += 1;
        }
        if let Some(start) = open {
            changed |= self.ranges.add(start, value + (num_bits as i64 - 1));
        }
        changed
    }

    /// Remove one value. Returns whether it was present.
    pub fn erase(&mut self, value: SequenceNumber) -> bool {
        self.ranges.remove(value)
    }

    /// Lower the low watermark to `value`, marking everything between
    /// `value` and the current `low()` as present.
    pub fn lowest_valid(&mut self, value: SequenceNumber) {
        if self.is_empty() || value >= self.low() {
            return;
        }
        let low = self.low();
        self.ranges.add(value, low.previous());
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Inclusive ranges strictly between consecutive stored ranges.
    pub fn missing_sequence_ranges(&self) -> Vec<SequenceRange> {
        let mut out = Vec::new();
        let mut prev: Option<SequenceNumber> = None;
        for (lo, hi) in self.ranges.iter() {
            if let Some(p) = prev {
                out.push(SequenceRange::new(p.next(), lo.previous()));
            }
            prev = Some(hi);
        }
        out
    }

    /// Stored ranges in ascending order.
    pub fn present_sequence_ranges(&self) -> Vec<SequenceRange> {
        self.ranges
            .iter()
            .map(|(lo, hi)| SequenceRange::new(lo, hi))
            .collect()
    }

    // ========================================================================
    // Bitmap encoding
    // ========================================================================

    /// Encode as an RTPS SequenceNumberSet with base `cumulative_ack() + 1`.
    ///
    /// `bitmap` is zeroed first. With `invert`, the missing ranges are
    /// encoded instead of the present ones. When the span does not fit,
    /// the encodable prefix is still written and `complete` is false.
    pub fn to_bitmap(&self, bitmap: &mut [u32], invert: bool) -> BitmapResult {
        bitmap.fill(0);
        let mut result = BitmapResult {
            complete: true,
            ..BitmapResult::default()
        };
        if !self.disjoint() {
            return result;
        }

        let base = self.cumulative_ack().next();
        let spans: Vec<SequenceRange> = if invert {
            self.missing_sequence_ranges()
        } else {
            self.present_sequence_ranges().into_iter().skip(1).collect()
        };

        for span in spans {
            let low = span.first - base;
            let high = span.second - base;
            if low > u32::MAX as i64 {
                result.complete = false;
                break;
            }
            let high = high.min(u32::MAX as i64);
            if !Self::fill_bitmap_range(
                low as u32,
                high as u32,
                bitmap,
                &mut result.num_bits,
                &mut result.cumulative_bits_added,
            ) {
                result.complete = false;
                break;
            }
        }
        result
    }

    /// Set bits `low..=high` (bit 0 = MSB of `bitmap[0]`).
    ///
    /// `high` is clamped to the bitmap; returns false when `low` lies
    /// outside it or when clamping was needed. `num_bits` becomes
    /// `high + 1` for whatever was written.
    pub fn fill_bitmap_range(
        low: u32,
        high: u32,
        bitmap: &mut [u32],
        num_bits: &mut u32,
        cumulative_bits_added: &mut u32,
    ) -> bool {
        let capacity = bitmap.len() as u64 * 32;
        if low as u64 >= capacity || high < low {
            return false;
        }
        let (high, clamped) = if high as u64 >= capacity {
            ((capacity - 1) as u32, true)
        } else {
            (high, false)
        };

        let mut bit = low;
        while bit <= high {
            let idx = (bit / 32) as usize;
            let offset = bit % 32;
            if offset == 0 && high - bit >= 31 {
                bitmap[idx] = u32::MAX;
                bit += 32;
                continue;
            }
            bitmap[idx] |= 0x8000_0000 >> offset;
            bit += 1;
        }

        *num_bits = high + 1;
        *cumulative_bits_added += high - low + 1;
        !clamped
    }

    /// Number of 32-bit words needed to cover `low..=high` (at most 8).
    pub fn bitmap_num_longs(low: SequenceNumber, high: SequenceNumber) -> usize {
        if high < low {
            return 0;
        }
        let words = (high - low).saturating_add(32) / 32;
        (words as usize).min(MAX_BITMAP_LONGS)
    }
}

fn validate(range: SequenceRange) -> Result<()> {
    if range.first > range.second {
        return Err(Error::InvalidRange {
            first: range.first,
            second: range.second,
        });
    }
    match range.second.value().checked_sub(range.first.value()) {
        Some(span) if span <= MAX_RANGE_SPAN => Ok(()),
        _ => Err(Error::RangeTooWide {
            first: range.first,
            second: range.second,
        }),
    }
}

impl fmt::Display for DisjointSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (lo, hi)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", SequenceRange::new(lo, hi))?;
        }
        write!(f, "]")
    }
}
