// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::cast_possible_wrap)] // Test parameters
#![allow(clippy::cast_sign_loss)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! DisjointSequence against a plain set model, and SequenceNumberSet
//! bitmap encoding as a receiver would use it for ACKNACKs.

use std::collections::BTreeSet;

use hdds_reliable::{DisjointSequence, SequenceNumber, SequenceRange};

const BITMAP_LONGS: usize = 8;

fn sn(v: i64) -> SequenceNumber {
    SequenceNumber::new(v)
}

fn random_sequence(rng: &mut fastrand::Rng, span: i64) -> (DisjointSequence, BTreeSet<i64>) {
    let mut seq = DisjointSequence::new();
    let mut model = BTreeSet::new();
    for _ in 0..rng.usize(1..40) {
        if rng.bool() {
            let v = rng.i64(1..=span);
            seq.insert(sn(v));
            model.insert(v);
        } else {
            let lo = rng.i64(1..=span);
            let hi = (lo + rng.i64(0..8)).min(span);
            seq.insert_range(SequenceRange::new(lo, hi)).unwrap();
            model.extend(lo..=hi);
        }
    }
    (seq, model)
}

#[test]
fn test_gap_repair_scenario() {
    let mut seq = DisjointSequence::new();
    seq.insert(sn(1));
    seq.insert(sn(2));
    seq.insert(sn(6));
    seq.insert(sn(9));

    assert_eq!(seq.cumulative_ack(), sn(2));
    assert_eq!(seq.last_ack(), sn(9));
    assert_eq!(
        seq.missing_sequence_ranges(),
        vec![SequenceRange::new(3, 5), SequenceRange::new(7, 8)]
    );

    // NACK for everything missing, base = cumulative_ack + 1 = 3.
    let mut bitmap = [0u32; BITMAP_LONGS];
    let result = seq.to_bitmap(&mut bitmap, true);
    assert!(result.complete);
    assert_eq!(result.num_bits, 6);
    assert_eq!(result.cumulative_bits_added, 5);
    assert_eq!(bitmap[0], 0b1110_1100 << 24);

    // Retransmissions close the gaps.
    seq.insert_range(SequenceRange::new(3, 5)).unwrap();
    seq.insert(sn(7));
    seq.insert(sn(8));
    assert!(!seq.disjoint());
    assert_eq!(seq.cumulative_ack(), sn(9));
    assert!(seq.missing_sequence_ranges().is_empty());
}

#[test]
fn test_matches_set_model() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for _ in 0..200 {
        let (seq, model) = random_sequence(&mut rng, 300);

        let low = *model.iter().next().unwrap();
        let high = *model.iter().next_back().unwrap();
        assert_eq!(seq.low(), sn(low));
        assert_eq!(seq.high(), sn(high));
        for v in low - 2..=high + 2 {
            assert_eq!(seq.contains(sn(v)), model.contains(&v), "value {} in {}", v, seq);
        }

        let missing: BTreeSet<i64> = seq
            .missing_sequence_ranges()
            .iter()
            .flat_map(|r| r.first.value()..=r.second.value())
            .collect();
        let expected: BTreeSet<i64> = (low..=high).filter(|v| !model.contains(v)).collect();
        assert_eq!(missing, expected);
        assert_eq!(seq.disjoint(), !expected.is_empty());

        // Stored ranges never touch.
        let present = seq.present_sequence_ranges();
        for pair in present.windows(2) {
            assert!(pair[0].second.value() + 1 < pair[1].first.value());
        }
    }
}

#[test]
fn test_bitmap_rebuilds_sequence() {
    let mut rng = fastrand::Rng::with_seed(42);
    for _ in 0..200 {
        let (seq, _) = random_sequence(&mut rng, 200);
        let mut bitmap = [0u32; BITMAP_LONGS];
        let result = seq.to_bitmap(&mut bitmap, false);
        assert!(result.complete);

        let mut rebuilt = DisjointSequence::new();
        rebuilt
            .insert_range(SequenceRange::new(seq.low(), seq.cumulative_ack()))
            .unwrap();
        rebuilt.insert_bitmap(seq.cumulative_ack().next(), result.num_bits, &bitmap);
        assert_eq!(rebuilt, seq, "bitmap {:08x?}", bitmap);
    }
}

#[test]
fn test_inverted_bitmap_counts_missing() {
    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..200 {
        let (seq, model) = random_sequence(&mut rng, 200);
        let mut bitmap = [0u32; BITMAP_LONGS];
        let result = seq.to_bitmap(&mut bitmap, true);
        assert!(result.complete);

        let low = *model.iter().next().unwrap();
        let high = *model.iter().next_back().unwrap();
        let missing = (low..=high).filter(|v| !model.contains(v)).count() as u32;
        assert_eq!(result.cumulative_bits_added, missing);
        let set: u32 = bitmap.iter().map(|w| w.count_ones()).sum();
        assert_eq!(set, missing);
    }
}

#[test]
fn test_wide_gap_truncates_bitmap() {
    let mut seq = DisjointSequence::new();
    seq.insert(sn(1));
    seq.insert(sn(1000));

    let mut bitmap = [0u32; BITMAP_LONGS];
    let result = seq.to_bitmap(&mut bitmap, true);
    assert!(!result.complete);
    assert_eq!(result.num_bits, 256);
    assert!(bitmap.iter().all(|w| *w == u32::MAX));

    assert_eq!(
        DisjointSequence::bitmap_num_longs(seq.cumulative_ack(), seq.high()),
        BITMAP_LONGS
    );
}
