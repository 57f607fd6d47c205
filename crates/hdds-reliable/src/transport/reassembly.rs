// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-side fragment reassembly.
//!
//! Fragments of one sample are keyed by (publication, sample sequence) and
//! stored as pieces covering inclusive fragment-number ranges. Adjacent
//! pieces are joined as fragments arrive in any order:
//!
//! ```text
//!   recv 3      [3]
//!   recv 1      [1] [3]
//!   recv 2      [1..3]            complete if fragment 3 has no MORE_FRAGMENTS
//! ```
//!
//! A sample completes once a single piece starting at fragment 1 remains
//! and that piece does not announce more fragments. Completed sequences are
//! remembered per publication so late duplicates are ignored. Partially
//! received samples are purged after `reassembly_timeout`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use super::chain::ByteChain;
use super::header::{MessageId, ReceivedSample, SampleHeader};
use crate::config::{TransportConfig, TransportDebug};
use crate::guid::GUID;
use crate::sequence::{DisjointSequence, SequenceNumber};

/// Inclusive range of fragment numbers.
pub type FragmentRange = (u32, u32);

/// Identity of a sample being reassembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragKey {
    pub publication_id: GUID,
    pub sequence: SequenceNumber,
}

impl FragKey {
    pub fn new(publication_id: GUID, sequence: SequenceNumber) -> Self {
        Self {
            publication_id,
            sequence,
        }
    }
}

/// Contiguous run of received fragments.
#[derive(Debug)]
struct Piece {
    last: u32,
    /// Header of the first fragment, `more_fragments` of the last
    header: SampleHeader,
    /// None once any covered fragment was declared unavailable
    data: Option<ByteChain>,
}

impl Piece {
    fn join(left: Piece, right: Piece) -> Piece {
        let data = match (left.data, right.data) {
            (Some(mut head), Some(tail)) => {
                head.extend_shared(&tail);
                Some(head)
            }
            _ => None,
        };
        let mut header = left.header;
        header.more_fragments = right.header.more_fragments;
        header.message_length = data.as_ref().map_or(0, |d| d.total_len() as u32);
        Piece {
            last: right.last,
            header,
            data,
        }
    }
}

#[derive(Debug)]
struct FragInfo {
    have_first: bool,
    /// Pieces keyed by their first fragment number
    pieces: BTreeMap<u32, Piece>,
    total_frags: u32,
    expiration: Instant,
}

impl FragInfo {
    fn new(have_first: bool, total_frags: u32, expiration: Instant) -> Self {
        Self {
            have_first,
            pieces: BTreeMap::new(),
            total_frags,
            expiration,
        }
    }

    /// Store `range`, joining it with adjacent pieces. Returns false for a
    /// duplicate or an overlapping range.
    fn insert(&mut self, range: FragmentRange, header: SampleHeader, data: Option<ByteChain>) -> bool {
        let (first, last) = range;
        if let Some((&start, piece)) = self.pieces.range(..=last).next_back() {
            if piece.last >= first {
                if start <= first && piece.last >= last {
                    log::trace!("[reassembly] duplicate fragments {}-{}", first, last);
                } else {
                    log::warn!(
                        "[reassembly] fragments {}-{} overlap stored {}-{}",
                        first,
                        last,
                        start,
                        piece.last
                    );
                }
                return false;
            }
        }

        let mut start = first;
        let mut piece = Piece { last, header, data };
        let left = self
            .pieces
            .range(..first)
            .next_back()
            .filter(|(_, p)| p.last.checked_add(1) == Some(first))
            .map(|(&s, _)| s);
        if let Some(left_start) = left {
            if let Some(left_piece) = self.pieces.remove(&left_start) {
                piece = Piece::join(left_piece, piece);
                start = left_start;
            }
        }
        if let Some(next) = piece.last.checked_add(1) {
            if let Some(right) = self.pieces.remove(&next) {
                piece = Piece::join(piece, right);
            }
        }
        self.pieces.insert(start, piece);
        true
    }

    fn is_complete(&self) -> bool {
        if !self.have_first || self.pieces.len() != 1 {
            return false;
        }
        self.pieces
            .iter()
            .next()
            .is_some_and(|(&start, piece)| start == 1 && !piece.header.more_fragments)
    }
}

#[derive(Debug, Default)]
struct ReassemblyState {
    fragments: HashMap<FragKey, FragInfo>,
    /// Expiration deadlines in insertion order; entries may be stale
    expiration_queue: VecDeque<(Instant, FragKey)>,
    completed: HashMap<GUID, DisjointSequence>,
}

impl ReassemblyState {
    fn check_expirations(&mut self, now: Instant, debug: &TransportDebug) {
        while let Some(&(deadline, key)) = self.expiration_queue.front() {
            if deadline > now {
                break;
            }
            self.expiration_queue.pop_front();
            let Some(info) = self.fragments.get(&key) else {
                continue;
            };
            if info.expiration <= now {
                self.fragments.remove(&key);
                if debug.log_fragment_storage {
                    log::debug!(
                        "[reassembly] purged expired seq={} leaving {} samples",
                        key.sequence,
                        self.fragments.len()
                    );
                }
            } else {
                // Refreshed since queued.
                self.expiration_queue.push_back((info.expiration, key));
            }
        }
    }
}

/// Fragment store for one receiving link.
#[derive(Debug)]
pub struct TransportReassembly {
    timeout: Duration,
    debug: TransportDebug,
    state: Mutex<ReassemblyState>,
}

impl TransportReassembly {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            debug: TransportDebug::default(),
            state: Mutex::new(ReassemblyState::default()),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.reassembly_timeout).with_debug(config.debug)
    }

    /// Builder: set debug switches
    pub fn with_debug(mut self, debug: TransportDebug) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Feed one decoded sample. Unfragmented samples pass straight through;
    /// fragments are stored until their sample completes.
    pub fn accept(&self, sample: ReceivedSample) -> Option<ReceivedSample> {
        if !sample.header.fragment {
            return Some(sample);
        }
        let number = sample.header.fragment_number;
        self.reassemble((number, number), sample, 0)
    }

    /// Store fragments `range` of `sample`, returning the whole sample once
    /// every fragment is present. Fragment 1 marks the sample's start.
    pub fn reassemble(
        &self,
        range: FragmentRange,
        sample: ReceivedSample,
        total_frags: u32,
    ) -> Option<ReceivedSample> {
        self.reassemble_at(Instant::now(), range, range.0 == 1, sample, total_frags)
    }

    /// [`reassemble`](Self::reassemble) with an explicit clock and start flag.
    pub fn reassemble_at(
        &self,
        now: Instant,
        range: FragmentRange,
        first_fragment: bool,
        sample: ReceivedSample,
        total_frags: u32,
    ) -> Option<ReceivedSample> {
        if range.0 == 0 || range.0 > range.1 {
            log::warn!("[reassembly] invalid fragment range {}-{}", range.0, range.1);
            return None;
        }
        let mut state = self.state.lock();
        state.check_expirations(now, &self.debug);

        let key = FragKey::new(sample.header.publication_id, sample.header.sequence);
        if state
            .completed
            .get(&key.publication_id)
            .is_some_and(|done| done.contains(key.sequence))
        {
            log::trace!("[reassembly] seq={} already completed, ignoring", key.sequence);
            return None;
        }

        let expiration = now + self.timeout;
        let data = Some(ByteChain::from_bytes(sample.payload));
        let state = &mut *state;
        if let Some(info) = state.fragments.get_mut(&key) {
            info.have_first |= first_fragment;
            info.total_frags = info.total_frags.max(total_frags);
            info.expiration = expiration;
        } else {
            state.expiration_queue.push_back((expiration, key));
            state
                .fragments
                .insert(key, FragInfo::new(first_fragment, total_frags, expiration));
        }
        let info = state.fragments.get_mut(&key)?;

        if !info.insert(range, sample.header, data) {
            return None;
        }
        if !info.is_complete() {
            if self.debug.log_fragment_storage {
                log::debug!(
                    "[reassembly] stored fragments {}-{} of seq={} ({} pieces)",
                    range.0,
                    range.1,
                    key.sequence,
                    info.pieces.len()
                );
            }
            return None;
        }

        let info = state.fragments.remove(&key)?;
        state
            .completed
            .entry(key.publication_id)
            .or_default()
            .insert(key.sequence);
        let (_, piece) = info.pieces.into_iter().next()?;
        if self.debug.log_fragment_storage {
            log::debug!(
                "[reassembly] completed seq={} leaving {} samples",
                key.sequence,
                state.fragments.len()
            );
        }
        // Fragments declared unavailable complete the sample without data.
        let chain = piece.data?;
        let payload = match chain.block_count() {
            1 => chain.front().cloned().unwrap_or_default(),
            _ => Bytes::from(chain.to_vec()),
        };
        let mut header = piece.header;
        header.fragment = false;
        header.more_fragments = false;
        header.fragment_number = 0;
        header.message_length = payload.len() as u32;
        Some(ReceivedSample { header, payload })
    }

    /// Forget everything stored for one sample.
    pub fn data_unavailable(&self, sequence: SequenceNumber, publication_id: GUID) {
        let mut state = self.state.lock();
        if state
            .fragments
            .remove(&FragKey::new(publication_id, sequence))
            .is_some()
            && self.debug.log_fragment_storage
        {
            log::debug!(
                "[reassembly] dropped seq={} leaving {} samples",
                sequence,
                state.fragments.len()
            );
        }
    }

    /// Declare fragments `range` of one sample lost for good. The sample
    /// can still complete, but is then discarded instead of delivered.
    pub fn fragments_unavailable(
        &self,
        sequence: SequenceNumber,
        publication_id: GUID,
        range: FragmentRange,
    ) {
        let mut state = self.state.lock();
        let key = FragKey::new(publication_id, sequence);
        let Some(info) = state.fragments.get_mut(&key) else {
            return;
        };
        let header = SampleHeader {
            fragment: true,
            more_fragments: true,
            ..SampleHeader::new(MessageId::SampleData, publication_id, sequence)
        };
        if range.0 == 1 {
            info.have_first = true;
        }
        if info.insert(range, header, None) && info.is_complete() {
            state.fragments.remove(&key);
            state.completed.entry(publication_id).or_default().insert(sequence);
        }
    }

    /// Total fragment count announced for a sample in progress.
    pub fn has_frags(&self, sequence: SequenceNumber, publication_id: GUID) -> Option<u32> {
        self.state
            .lock()
            .fragments
            .get(&FragKey::new(publication_id, sequence))
            .map(|info| info.total_frags)
    }

    /// Forget which samples of `publication_id` completed.
    pub fn clear_completed(&self, publication_id: GUID) {
        self.state.lock().completed.remove(&publication_id);
    }

    /// Encode the missing fragments of a sample as a bitmap relative to the
    /// returned base fragment number. Returns `(base, num_bits)`; `(0, 0)`
    /// when nothing is missing or nothing is known.
    pub fn get_gaps(
        &self,
        sequence: SequenceNumber,
        publication_id: GUID,
        bitmap: &mut [u32],
    ) -> (u32, u32) {
        bitmap.fill(0);
        if bitmap.is_empty() {
            return (0, 0);
        }
        let state = self.state.lock();
        let Some(info) = state.fragments.get(&FragKey::new(publication_id, sequence)) else {
            return (0, 0);
        };
        let (Some((&first, front)), Some((_, back))) =
            (info.pieces.iter().next(), info.pieces.iter().next_back())
        else {
            return (0, 0);
        };

        let mut num_bits = 0u32;
        let mut added = 0u32;
        let base = if first == 1 { front.last.saturating_add(1) } else { 1 };

        if first != 1 {
            // Everything before the first piece.
            DisjointSequence::fill_bitmap_range(0, first - 2, bitmap, &mut num_bits, &mut added);
        } else if info.pieces.len() == 1 {
            // No holes yet, but more fragments are due.
            let upper = if info.total_frags == 0 {
                0
            } else {
                let limit = back.last.saturating_sub(1).max(base);
                info.total_frags.saturating_sub(limit)
            };
            DisjointSequence::fill_bitmap_range(0, upper, bitmap, &mut num_bits, &mut added);
            return (base, num_bits);
        }

        let starts: Vec<(u32, u32)> = info.pieces.iter().map(|(&s, p)| (s, p.last)).collect();
        for pair in starts.windows(2) {
            let low = pair[0].1 + 1 - base;
            let high = pair[1].0 - 1 - base;
            DisjointSequence::fill_bitmap_range(low, high, bitmap, &mut num_bits, &mut added);
        }
        (base, num_bits)
    }

    /// Purge samples whose timeout elapsed before `now`.
    pub fn check_expirations(&self, now: Instant) {
        self.state.lock().check_expirations(now, &self.debug);
    }

    /// Samples currently in progress.
    pub fn fragments_size(&self) -> usize {
        self.state.lock().fragments.len()
    }

    pub fn queue_size(&self) -> usize {
        self.state.lock().expiration_queue.len()
    }

    /// Publications with completed-sample history.
    pub fn completed_size(&self) -> usize {
        self.state.lock().completed.len()
    }

    /// Sum of announced fragment counts over samples in progress.
    pub fn total_frags(&self) -> usize {
        self.state
            .lock()
            .fragments
            .values()
            .map(|info| info.total_frags as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUB: GUID = GUID {
        prefix: [3; 12],
        entity_id: [0, 0, 1, 2],
    };

    fn fragment(seq: i64, number: u32, more: bool, payload: &'static [u8]) -> ReceivedSample {
        let mut header = SampleHeader::new(MessageId::SampleData, PUB, SequenceNumber::new(seq));
        header.fragment = true;
        header.more_fragments = more;
        header.fragment_number = number;
        header.message_length = payload.len() as u32;
        ReceivedSample {
            header,
            payload: Bytes::from_static(payload),
        }
    }

    fn reassembly() -> TransportReassembly {
        TransportReassembly::new(Duration::from_secs(30))
    }

    #[test]
    fn test_in_order_completion() {
        let r = reassembly();
        assert!(r.accept(fragment(1, 1, true, b"ab")).is_none());
        assert!(r.accept(fragment(1, 2, true, b"cd")).is_none());
        let whole = r.accept(fragment(1, 3, false, b"ef")).unwrap();
        assert_eq!(&whole.payload[..], b"abcdef");
        assert!(!whole.header.fragment);
        assert_eq!(whole.header.message_length, 6);
        assert_eq!(r.fragments_size(), 0);
        assert_eq!(r.completed_size(), 1);
    }

    #[test]
    fn test_out_of_order_completion() {
        let r = reassembly();
        assert!(r.accept(fragment(2, 3, false, b"3")).is_none());
        assert!(r.accept(fragment(2, 1, true, b"1")).is_none());
        let whole = r.accept(fragment(2, 2, true, b"2")).unwrap();
        assert_eq!(&whole.payload[..], b"123");
    }

    #[test]
    fn test_unfragmented_passthrough() {
        let r = reassembly();
        let mut plain = fragment(4, 0, false, b"whole");
        plain.header.fragment = false;
        assert_eq!(r.accept(plain.clone()), Some(plain));
        assert_eq!(r.fragments_size(), 0);
    }

    #[test]
    fn test_duplicates_ignored() {
        let r = reassembly();
        assert!(r.accept(fragment(1, 1, true, b"a")).is_none());
        assert!(r.accept(fragment(1, 1, true, b"a")).is_none());
        assert!(r.accept(fragment(1, 2, false, b"b")).is_some());
        // Late copy of a completed sample.
        assert!(r.accept(fragment(1, 2, false, b"b")).is_none());
        assert_eq!(r.fragments_size(), 0);

        r.clear_completed(PUB);
        assert_eq!(r.completed_size(), 0);
    }

    #[test]
    fn test_data_unavailable_discards() {
        let r = reassembly();
        r.accept(fragment(5, 1, true, b"a"));
        assert_eq!(r.has_frags(SequenceNumber::new(5), PUB), Some(0));
        r.data_unavailable(SequenceNumber::new(5), PUB);
        assert_eq!(r.has_frags(SequenceNumber::new(5), PUB), None);
    }

    #[test]
    fn test_fragments_unavailable_completes_without_data() {
        let r = reassembly();
        r.accept(fragment(6, 1, true, b"a"));
        r.fragments_unavailable(SequenceNumber::new(6), PUB, (2, 2));
        // The last fragment arrives but the sample can no longer be delivered.
        assert!(r.accept(fragment(6, 3, false, b"c")).is_none());
        assert_eq!(r.fragments_size(), 0);
        assert!(r.accept(fragment(6, 3, false, b"c")).is_none());
    }

    #[test]
    fn test_gaps_between_pieces() {
        let r = reassembly();
        r.accept(fragment(1, 1, true, b"a"));
        r.accept(fragment(1, 3, true, b"c"));
        r.accept(fragment(1, 6, false, b"f"));
        let mut bitmap = [0u32; 8];
        let (base, num_bits) = r.get_gaps(SequenceNumber::new(1), PUB, &mut bitmap);
        // Missing 2, 4 and 5 relative to base 2.
        assert_eq!(base, 2);
        assert_eq!(num_bits, 4);
        assert_eq!(bitmap[0], 0b1011u32 << 28);
    }

    #[test]
    fn test_gaps_before_first_piece() {
        let r = reassembly();
        r.accept(fragment(1, 3, false, b"c"));
        let mut bitmap = [0u32; 1];
        let (base, num_bits) = r.get_gaps(SequenceNumber::new(1), PUB, &mut bitmap);
        assert_eq!(base, 1);
        assert_eq!(num_bits, 2);
        assert_eq!(bitmap[0], 0b11u32 << 30);
    }

    #[test]
    fn test_gaps_with_known_total() {
        let r = reassembly();
        r.reassemble((1, 2), fragment(1, 1, true, b"ab"), 5);
        let mut bitmap = [0u32; 2];
        let (base, num_bits) = r.get_gaps(SequenceNumber::new(1), PUB, &mut bitmap);
        assert_eq!(base, 3);
        assert_eq!(num_bits, 3);
        assert_eq!(r.total_frags(), 5);

        // Unknown total: just ask for the next one.
        let r = reassembly();
        r.accept(fragment(2, 1, true, b"a"));
        let (base, num_bits) = r.get_gaps(SequenceNumber::new(2), PUB, &mut bitmap);
        assert_eq!((base, num_bits), (2, 1));
    }

    #[test]
    fn test_gaps_unknown_sample() {
        let r = reassembly();
        let mut bitmap = [u32::MAX; 2];
        assert_eq!(r.get_gaps(SequenceNumber::new(9), PUB, &mut bitmap), (0, 0));
        assert_eq!(bitmap, [0, 0]);
    }

    #[test]
    fn test_expiration_and_refresh() {
        let timeout = Duration::from_millis(100);
        let r = TransportReassembly::new(timeout);
        let t0 = Instant::now();
        r.reassemble_at(t0, (1, 1), true, fragment(1, 1, true, b"a"), 0);
        r.reassemble_at(t0, (1, 1), true, fragment(2, 1, true, b"a"), 0);
        // Sample 2 refreshed halfway through.
        r.reassemble_at(t0 + timeout / 2, (2, 2), false, fragment(2, 2, true, b"b"), 0);

        r.check_expirations(t0 + timeout + Duration::from_millis(1));
        assert_eq!(r.fragments_size(), 1);
        assert!(r.has_frags(SequenceNumber::new(2), PUB).is_some());
        assert_eq!(r.queue_size(), 1);

        r.check_expirations(t0 + timeout * 2);
        assert_eq!(r.fragments_size(), 0);
        assert_eq!(r.queue_size(), 0);
    }

    #[test]
    fn test_overlap_rejected() {
        let r = reassembly();
        let mut sample = fragment(1, 1, true, b"ab");
        assert!(r.reassemble((2, 3), sample.clone(), 0).is_none());
        sample.header.more_fragments = false;
        assert!(r.reassemble((3, 4), sample, 0).is_none());
        let mut bitmap = [0u32; 1];
        // Only 2-3 stored; 1 missing before it.
        assert_eq!(r.get_gaps(SequenceNumber::new(1), PUB, &mut bitmap), (1, 1));
    }
}
