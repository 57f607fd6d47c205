// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Removal of samples from an assembled (possibly partially sent) packet.
//!
//! Bytes that are already in a packet chain cannot be taken out without
//! corrupting the packet, and bytes already written to the link cannot be
//! taken back. Instead, each matching element is swapped for a
//! [`Replaced`](super::element::ElementKind::Replaced) deep copy and the
//! element's blocks in the packet chain are spliced over to the copy's
//! blocks. The original is then dropped and the application may reuse its
//! buffers while the packet still goes out intact.
//!
//! ```text
//!   chain:  [pkt-hdr] [hdrA] [..A] [hdrB] [payB] [hdrC] [payC]
//!                                    ^^^^^^^^^^^^ B matches
//!   after:  [pkt-hdr] [hdrA] [..A] [hdrB'][payB'][hdrC] [payC]
//!                                    deep copies, same read offset
//! ```
//!
//! The first element of the queue may already be partially sent: its
//! leading blocks are gone from the chain and the chain head may be a
//! suffix of one of its blocks. Later elements always start at a block
//! boundary.

use super::chain::{read_offset, same_block, ByteChain};
use super::element::{ElementRef, MatchCriteria, QueueElement, RemoveResult};
use super::queue::{ReplaceVisitor, Visit};

/// Replace visitor splicing deep copies into a packet chain.
pub struct PacketRemoveVisitor<'a> {
    criteria: &'a dyn MatchCriteria,
    chain: &'a mut ByteChain,
    /// Index where the next element's blocks may start.
    cursor: usize,
    first: bool,
    status: RemoveResult,
}

impl<'a> PacketRemoveVisitor<'a> {
    /// `header_in_chain`: the chain still starts with the packet header block.
    pub fn new(criteria: &'a dyn MatchCriteria, chain: &'a mut ByteChain, header_in_chain: bool) -> Self {
        Self {
            criteria,
            chain,
            cursor: usize::from(header_in_chain),
            first: true,
            status: RemoveResult::NotFound,
        }
    }

    pub fn status(&self) -> RemoveResult {
        self.status
    }

    /// Locate `element` in the chain: (chain index, element block index).
    fn locate(&self, element: &QueueElement, first: bool) -> Option<(usize, usize)> {
        if first {
            let head = self.chain.get(self.cursor)?;
            let block_index = element.msg().blocks().position(|b| same_block(b, head))?;
            Some((self.cursor, block_index))
        } else {
            let first_block = element.msg().front()?;
            let chain_index = self.chain.position_of(first_block, self.cursor)?;
            Some((chain_index, 0))
        }
    }

    fn replace(&mut self, slot: &mut ElementRef) -> Result<(), String> {
        let first = std::mem::replace(&mut self.first, false);
        let (chain_index, block_index) = self
            .locate(slot, first)
            .ok_or_else(|| format!("element seq={} not found in packet chain", slot.sequence()))?;

        let element_blocks: Vec<_> = slot.msg().blocks().cloned().collect();
        let span = element_blocks.len() - block_index;
        for (k, block) in element_blocks[block_index..].iter().enumerate() {
            match self.chain.get(chain_index + k) {
                Some(chained) if same_block(chained, block) => {}
                Some(_) => {
                    return Err(format!(
                        "block {} of element seq={} out of order in packet chain",
                        block_index + k,
                        slot.sequence()
                    ))
                }
                None => {
                    return Err(format!(
                        "packet chain ends inside element seq={}",
                        slot.sequence()
                    ))
                }
            }
        }

        let offset = match self.chain.get(chain_index) {
            Some(chained) => read_offset(&element_blocks[block_index], chained),
            None => 0,
        };
        let replacement = QueueElement::replaced(slot);
        let mut new_blocks: Vec<_> = replacement.msg().blocks().skip(block_index).cloned().collect();
        if let Some(front) = new_blocks.first_mut() {
            *front = front.slice(offset..);
        }
        self.chain.splice(chain_index, span, new_blocks);
        self.cursor = chain_index + span;

        let original = std::mem::replace(slot, replacement);
        let released = original.data_dropped(false);
        if released || self.status != RemoveResult::Released {
            self.status = if released {
                RemoveResult::Released
            } else {
                RemoveResult::Found
            };
        }
        Ok(())
    }
}

impl ReplaceVisitor for PacketRemoveVisitor<'_> {
    fn visit_replace(&mut self, slot: &mut ElementRef) -> Visit {
        if slot.is_replaced() {
            self.first = false;
            return Visit::Continue;
        }
        if !self.criteria.matches(slot) {
            self.first = false;
            return Visit::Continue;
        }
        match self.replace(slot) {
            Ok(()) if self.criteria.unique() => Visit::Stop,
            Ok(()) => Visit::Continue,
            Err(msg) => {
                log::error!("[send] packet remove failed: {}", msg);
                self.status = RemoveResult::Error;
                Visit::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::element::test_support::*;
    use super::super::element::{MatchOnDataPayload, MatchOnPubId};
    use super::super::header::PacketHeader;
    use super::super::queue::{BuildChainVisitor, ElementQueue};
    use super::*;
    use crate::guid::GUID;
    use std::sync::Arc;

    fn packet(elems: &ElementQueue) -> ByteChain {
        let mut chain = ByteChain::from_bytes(PacketHeader::new([0; 12]).encode());
        let mut build = BuildChainVisitor::new();
        elems.accept_visitor(&mut build);
        chain.extend_shared(&build.into_chain());
        chain
    }

    #[test]
    fn test_replace_middle_element() {
        let listener = Arc::new(RecordingListener::default());
        let pub_id = GUID::from_parts(1, 1);
        let target = sample(&listener, pub_id, 2, b"bbbb");
        let mut elems: ElementQueue = vec![
            sample(&listener, pub_id, 1, b"aaaa"),
            Arc::clone(&target),
            sample(&listener, pub_id, 3, b"cccc"),
        ]
        .into_iter()
        .collect();
        let mut chain = packet(&elems);
        let before = chain.to_vec();

        let criteria = MatchOnDataPayload::new(&target);
        let mut visitor = PacketRemoveVisitor::new(&criteria, &mut chain, true);
        elems.accept_replace_visitor(&mut visitor);
        assert_eq!(visitor.status(), RemoveResult::Released);

        // Wire bytes unchanged, but no longer aliasing the original.
        assert_eq!(chain.to_vec(), before);
        assert!(chain.position_of(target.msg().get(1).unwrap(), 0).is_none());
        let replaced: Vec<_> = elems.iter().filter(|e| e.is_replaced()).collect();
        assert_eq!(replaced.len(), 1);
        assert!(chain.position_of(replaced[0].msg().get(1).unwrap(), 0).is_some());
    }

    #[test]
    fn test_replace_partially_sent_head() {
        let listener = Arc::new(RecordingListener::default());
        let pub_id = GUID::from_parts(1, 1);
        let mut elems: ElementQueue = vec![
            sample(&listener, pub_id, 1, b"0123456789"),
            sample(&listener, pub_id, 2, b"abcdef"),
        ]
        .into_iter()
        .collect();
        let mut chain = packet(&elems);
        // Header block and sample header of element 1 sent, 3 payload bytes sent.
        chain.pop_front();
        chain.pop_front();
        chain.advance_front(3);
        let before = chain.to_vec();

        let criteria = MatchOnPubId::new(pub_id);
        let mut visitor = PacketRemoveVisitor::new(&criteria, &mut chain, false);
        elems.accept_replace_visitor(&mut visitor);
        assert_eq!(visitor.status(), RemoveResult::Released);
        assert_eq!(chain.to_vec(), before);
        assert_eq!(&chain.front().unwrap()[..], b"3456789");
        assert!(elems.iter().all(|e| e.is_replaced()));
        assert_eq!(listener.dropped.lock().len(), 2);
    }

    #[test]
    fn test_replaced_elements_skipped() {
        let listener = Arc::new(RecordingListener::default());
        let pub_id = GUID::from_parts(1, 1);
        let mut elems: ElementQueue = vec![sample(&listener, pub_id, 1, b"aaaa")]
            .into_iter()
            .collect();
        let mut chain = packet(&elems);
        let criteria = MatchOnPubId::new(pub_id);
        let mut first = PacketRemoveVisitor::new(&criteria, &mut chain, true);
        elems.accept_replace_visitor(&mut first);
        assert_eq!(first.status(), RemoveResult::Released);

        let mut second = PacketRemoveVisitor::new(&criteria, &mut chain, true);
        elems.accept_replace_visitor(&mut second);
        assert_eq!(second.status(), RemoveResult::NotFound);
    }

    #[test]
    fn test_chain_out_of_sync_is_error() {
        let listener = Arc::new(RecordingListener::default());
        let pub_id = GUID::from_parts(1, 1);
        let mut elems: ElementQueue = vec![sample(&listener, pub_id, 1, b"aaaa")]
            .into_iter()
            .collect();
        let mut chain = ByteChain::copy_from_slice(b"unrelated bytes");
        let criteria = MatchOnPubId::new(pub_id);
        let mut visitor = PacketRemoveVisitor::new(&criteria, &mut chain, false);
        elems.accept_replace_visitor(&mut visitor);
        assert_eq!(visitor.status(), RemoveResult::Error);
        assert!(listener.dropped.lock().is_empty());
    }
}
