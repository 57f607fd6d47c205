// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send buffer: sent packets retained for resend.
//!
//! Each sent packet is stored under its packet sequence number as a queue
//! of retained elements plus a duplicate of the packet byte chain. Both
//! share storage with what went on the wire; nothing is copied until a
//! publication goes away and [`SendBuffer::retain_all`] swaps its elements
//! for private deep copies.
//!
//! ```text
//!   buffers:    seq 4 -> Packet{elems, chain}
//!               seq 5 -> Fragments            fragments: seq 5 -> {1 -> .., 2 -> ..}
//!               seq 6 -> Packet{elems, chain}
//! ```
//!
//! At capacity the lowest sequence is aged off before an insert. Retained
//! entries that leave the buffer are released after the buffer lock is
//! dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::chain::ByteChain;
use super::element::{MatchOnPubId, RemoveResult};
use super::link::{send_chain, TransportLink};
use super::metrics::SendMetrics;
use super::packet_remove::PacketRemoveVisitor;
use super::queue::{CopyChainVisitor, ElementQueue, RemoveAllVisitor};
use crate::config::{TransportConfig, TransportDebug, UNLIMITED_CAPACITY};
use crate::guid::GUID;
use crate::sequence::{DisjointSequence, SequenceNumber, SequenceRange};

/// One retained packet: retained element copies and the packet bytes.
#[derive(Debug, Default)]
pub struct RetainedPacket {
    pub elems: ElementQueue,
    pub chain: ByteChain,
}

impl RetainedPacket {
    fn new(elems: &ElementQueue, chain: &ByteChain) -> Self {
        let mut retained = ElementQueue::new();
        elems.accept_visitor(&mut CopyChainVisitor::new(&mut retained));
        Self {
            elems: retained,
            chain: chain.clone(),
        }
    }

    /// Replace every element of `publication_id` with a private deep copy.
    fn retain(&mut self, publication_id: GUID) -> RemoveResult {
        let criteria = MatchOnPubId::new(publication_id);
        let mut visitor = PacketRemoveVisitor::new(&criteria, &mut self.chain, true);
        self.elems.accept_replace_visitor(&mut visitor);
        visitor.status()
    }

    fn release(mut self) {
        let mut visitor = RemoveAllVisitor::new();
        self.elems.accept_remove_visitor(&mut visitor);
    }
}

#[derive(Debug)]
enum BufferEntry {
    Packet(RetainedPacket),
    /// Data lives in the fragment map under the same sequence.
    Fragments,
}

#[derive(Debug, Default)]
struct BufferState {
    buffers: BTreeMap<SequenceNumber, BufferEntry>,
    fragments: BTreeMap<SequenceNumber, BTreeMap<SequenceNumber, RetainedPacket>>,
    destinations: HashMap<SequenceNumber, GUID>,
}

impl BufferState {
    /// Unlink `seq`, collecting every packet stored for it.
    fn remove(&mut self, seq: SequenceNumber, removed: &mut Vec<RetainedPacket>) -> bool {
        self.destinations.remove(&seq);
        match self.buffers.remove(&seq) {
            Some(BufferEntry::Packet(packet)) => {
                removed.push(packet);
                true
            }
            Some(BufferEntry::Fragments) => {
                if let Some(frags) = self.fragments.remove(&seq) {
                    removed.extend(frags.into_values());
                }
                true
            }
            None => false,
        }
    }
}

/// Bounded store of sent packets, keyed by packet sequence.
pub struct SendBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    metrics: Arc<SendMetrics>,
    debug: TransportDebug,
}

impl SendBuffer {
    /// Buffer holding up to `capacity` packets ([`UNLIMITED_CAPACITY`] = no limit).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState::default()),
            metrics: Arc::new(SendMetrics::new()),
            debug: TransportDebug::default(),
        }
    }

    /// Buffer sized and configured from `config`.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.send_buffer_capacity).with_debug(config.debug)
    }

    /// Builder: count into shared metrics
    pub fn with_metrics(mut self, metrics: Arc<SendMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Builder: verbose logging switches
    pub fn with_debug(mut self, debug: TransportDebug) -> Self {
        self.debug = debug;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of packet sequences held (a fragmented packet counts once).
    pub fn len(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().buffers.is_empty()
    }

    /// Lowest buffered sequence.
    pub fn low(&self) -> Option<SequenceNumber> {
        self.state.lock().buffers.keys().next().copied()
    }

    /// Highest buffered sequence.
    pub fn high(&self) -> Option<SequenceNumber> {
        self.state.lock().buffers.keys().next_back().copied()
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.state.lock().buffers.contains_key(&seq)
    }

    /// Destination recorded for a single-subscription packet.
    pub fn destination(&self, seq: SequenceNumber) -> Option<GUID> {
        self.state.lock().destinations.get(&seq).copied()
    }

    fn check_capacity(&self, state: &mut BufferState, removed: &mut Vec<RetainedPacket>) {
        if self.capacity == UNLIMITED_CAPACITY || state.buffers.len() < self.capacity {
            return;
        }
        if let Some(&oldest) = state.buffers.keys().next() {
            if self.debug.log_remote_counts {
                log::debug!("[sendbuf] aging off packet seq={}", oldest);
            }
            state.remove(oldest, removed);
            self.metrics.record_packet_evicted();
        }
    }

    fn release_outside_lock(removed: Vec<RetainedPacket>) {
        for packet in removed {
            packet.release();
        }
    }

    /// Retain a sent packet.
    ///
    /// When the packet carries exactly one element directed at a single
    /// subscription, that subscription is recorded as its destination.
    pub fn insert(&self, seq: SequenceNumber, elems: &ElementQueue, chain: &ByteChain) {
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            self.check_capacity(&mut state, &mut removed);
            if let Some(BufferEntry::Fragments) = state.buffers.get(&seq) {
                if let Some(frags) = state.fragments.remove(&seq) {
                    removed.extend(frags.into_values());
                }
            }
            let packet = RetainedPacket::new(elems, chain);
            if self.debug.log_remote_counts {
                log::debug!(
                    "[sendbuf] saved packet seq={} ({} elements, {} bytes)",
                    seq,
                    packet.elems.len(),
                    packet.chain.total_len()
                );
            }
            if let Some(BufferEntry::Packet(old)) =
                state.buffers.insert(seq, BufferEntry::Packet(packet))
            {
                removed.push(old);
            }
            match (elems.len(), elems.peek().and_then(|e| e.subscription_id())) {
                (1, Some(sub)) if !sub.is_unknown() => {
                    state.destinations.insert(seq, sub);
                }
                _ => {
                    state.destinations.remove(&seq);
                }
            }
        }
        self.metrics.record_packet_retained();
        Self::release_outside_lock(removed);
    }

    /// Retain one fragment of a packet.
    ///
    /// The packet sequence takes a single capacity slot no matter how many
    /// fragments it has.
    pub fn insert_fragment(
        &self,
        seq: SequenceNumber,
        fragment: SequenceNumber,
        elems: &ElementQueue,
        chain: &ByteChain,
    ) {
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.fragments.contains_key(&seq) {
                self.check_capacity(&mut state, &mut removed);
            }
            if let Some(BufferEntry::Packet(old)) = state.buffers.insert(seq, BufferEntry::Fragments) {
                removed.push(old);
            }
            let packet = RetainedPacket::new(elems, chain);
            if self.debug.log_fragment_storage {
                log::debug!(
                    "[sendbuf] saved fragment seq={} frag={} ({} bytes)",
                    seq,
                    fragment,
                    packet.chain.total_len()
                );
            }
            if let Some(old) = state.fragments.entry(seq).or_default().insert(fragment, packet) {
                removed.push(old);
            }
        }
        self.metrics.record_packet_retained();
        Self::release_outside_lock(removed);
    }

    /// Swap every buffered element of `publication_id` for a deep copy so the
    /// publication's own buffers can be released.
    ///
    /// A packet whose chain no longer matches its elements is released.
    pub fn retain_all(&self, publication_id: GUID) {
        if self.debug.log_remote_counts {
            log::debug!("[sendbuf] copying out blocks for publication {}", publication_id);
        }
        let mut removed = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut failed = Vec::new();
            for (&seq, entry) in state.buffers.iter_mut() {
                match entry {
                    BufferEntry::Packet(packet) => {
                        if packet.retain(publication_id) == RemoveResult::Error {
                            log::warn!(
                                "[sendbuf] failed to retain data from publication {}, releasing seq={}",
                                publication_id,
                                seq
                            );
                            failed.push(seq);
                        }
                    }
                    BufferEntry::Fragments => {
                        if let Some(frags) = state.fragments.get_mut(&seq) {
                            let bad: Vec<_> = frags
                                .iter_mut()
                                .filter_map(|(&frag, packet)| {
                                    (packet.retain(publication_id) == RemoveResult::Error)
                                        .then_some(frag)
                                })
                                .collect();
                            for frag in bad {
                                log::warn!(
                                    "[sendbuf] failed to retain fragment data from publication {}, releasing seq={} frag={}",
                                    publication_id,
                                    seq,
                                    frag
                                );
                                if let Some(packet) = frags.remove(&frag) {
                                    removed.push(packet);
                                }
                            }
                        }
                    }
                }
            }
            for seq in failed {
                state.remove(seq, &mut removed);
            }
        }
        Self::release_outside_lock(removed);
    }

    /// Resend every buffered packet in `range` over `link`.
    ///
    /// Sequences no longer buffered, or buffered for a different destination
    /// when `destination` is known, are inserted into `gaps`. Returns whether
    /// the whole range was still available; a range starting at zero asks
    /// for the entire history.
    pub fn resend(
        &self,
        range: SequenceRange,
        mut gaps: Option<&mut DisjointSequence>,
        destination: GUID,
        link: &dyn TransportLink,
    ) -> bool {
        let low = self.low();
        let low_for_all_resent = if range.first == SequenceNumber::ZERO {
            low
        } else {
            Some(range.first)
        };
        let has_dest = !destination.is_unknown();

        let mut seq = range.first;
        while seq <= range.second {
            {
                let state = self.state.lock();
                let entry = state.buffers.get(&seq);
                let wrong_dest = has_dest && state.destinations.get(&seq) != Some(&destination);
                match entry {
                    Some(entry) if !wrong_dest => {
                        if self.debug.log_remote_counts {
                            log::debug!("[sendbuf] resending packet seq={}", seq);
                        }
                        match entry {
                            BufferEntry::Packet(packet) => self.resend_one(packet, link),
                            BufferEntry::Fragments => {
                                if let Some(frags) = state.fragments.get(&seq) {
                                    for packet in frags.values() {
                                        self.resend_one(packet, link);
                                    }
                                }
                            }
                        }
                    }
                    _ => {
                        self.metrics.record_resend_gap();
                        if let Some(gaps) = gaps.as_deref_mut() {
                            gaps.insert(seq);
                        }
                    }
                }
            }
            if seq == SequenceNumber::MAX_VALUE {
                break;
            }
            seq = seq.next();
        }

        match (low_for_all_resent, low, self.high()) {
            (Some(first), Some(low), Some(high)) => first >= low && range.second <= high,
            _ => false,
        }
    }

    /// Resend the fragments of packet `seq` whose numbers are in `requested`.
    pub fn resend_fragments(
        &self,
        seq: SequenceNumber,
        requested: &DisjointSequence,
        link: &dyn TransportLink,
    ) {
        if requested.is_empty() {
            return;
        }
        let state = self.state.lock();
        let Some(frags) = state.fragments.get(&seq) else {
            return;
        };
        for range in requested.present_sequence_ranges() {
            for (frag, packet) in frags.range(range.first..=range.second) {
                if self.debug.log_fragment_storage {
                    log::debug!("[sendbuf] resending fragment seq={} frag={}", seq, frag);
                }
                self.resend_one(packet, link);
            }
        }
    }

    fn resend_one(&self, packet: &RetainedPacket, link: &dyn TransportLink) {
        match send_chain(link, &packet.chain) {
            Ok(n) if n == packet.chain.total_len() => self.metrics.record_packet_resent(),
            Ok(n) => {
                log::debug!(
                    "[sendbuf] resend wrote {} of {} bytes",
                    n,
                    packet.chain.total_len()
                );
                self.metrics.record_packet_resent();
            }
            Err(e) => log::debug!("[sendbuf] resend failed: {}", e),
        }
    }

    /// Release packet `seq` after it has been acknowledged.
    pub fn release_acked(&self, seq: SequenceNumber) {
        let mut removed = Vec::new();
        self.state.lock().remove(seq, &mut removed);
        Self::release_outside_lock(removed);
    }

    /// Unlink packet `seq` and hand its retained packets to the caller.
    pub fn remove_acked(&self, seq: SequenceNumber) -> Vec<RetainedPacket> {
        let mut removed = Vec::new();
        self.state.lock().remove(seq, &mut removed);
        removed
    }

    /// Release every retained packet.
    pub fn release_all(&self) {
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            let seqs: Vec<_> = state.buffers.keys().copied().collect();
            for seq in seqs {
                state.remove(seq, &mut removed);
            }
        }
        Self::release_outside_lock(removed);
    }
}

impl Drop for SendBuffer {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
