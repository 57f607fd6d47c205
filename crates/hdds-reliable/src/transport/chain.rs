// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted byte chains.
//!
//! A [`ByteChain`] is an ordered list of [`Bytes`] blocks. Cloning a chain
//! shares every block; [`ByteChain::deep_copy`] allocates fresh storage.
//! A packet chain is the packet header block followed by the blocks of each
//! element it carries, so element blocks and packet blocks alias the same
//! memory:
//!
//! ```text
//!   element A: [hdrA][payloadA]       element B: [hdrB][payloadB]
//!                 |       |                         |       |
//!   packet:  [pkt][hdrA][payloadA]              [hdrB][payloadB]
//! ```
//!
//! After a partial send the front block of the packet is a suffix of the
//! element block it came from: both still end at the same address, which is
//! how [`same_block`] pairs them.

use std::collections::VecDeque;
use std::io::IoSlice;

use bytes::{Buf, Bytes};

/// Whether two views address the same underlying block.
///
/// Views are compared by their end address; a block that has been partially
/// consumed from the front still matches the block it was cut from.
pub fn same_block(a: &Bytes, b: &Bytes) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a_end = a.as_ptr() as usize + a.len();
    let b_end = b.as_ptr() as usize + b.len();
    a_end == b_end
}

/// Bytes of `element_block` already consumed in `packet_block`.
pub fn read_offset(element_block: &Bytes, packet_block: &Bytes) -> usize {
    element_block.len().saturating_sub(packet_block.len())
}

/// Ordered chain of shared byte blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteChain {
    blocks: VecDeque<Bytes>,
}

impl ByteChain {
    pub fn new() -> Self {
        Self {
            blocks: VecDeque::new(),
        }
    }

    /// Chain holding a single block.
    pub fn from_bytes(block: Bytes) -> Self {
        let mut chain = Self::new();
        chain.push_back(block);
        chain
    }

    /// Chain holding a private copy of `data`.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Append a block. Empty blocks are ignored.
    pub fn push_back(&mut self, block: Bytes) {
        if !block.is_empty() {
            self.blocks.push_back(block);
        }
    }

    /// Append every block of `other`, sharing storage.
    pub fn extend_shared(&mut self, other: &ByteChain) {
        self.blocks.extend(other.blocks.iter().cloned());
    }

    pub fn total_len(&self) -> usize {
        self.blocks.iter().map(Bytes::len).sum()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.blocks.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.blocks.get(index)
    }

    pub fn front(&self) -> Option<&Bytes> {
        self.blocks.front()
    }

    pub fn back(&self) -> Option<&Bytes> {
        self.blocks.back()
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.blocks.pop_front()
    }

    /// Consume `n` bytes from the front block (`n` < its length).
    pub fn advance_front(&mut self, n: usize) {
        if let Some(front) = self.blocks.front_mut() {
            front.advance(n.min(front.len()));
        }
    }

    /// Index of the first block at or after `from` aliasing `block`.
    pub fn position_of(&self, block: &Bytes, from: usize) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, b)| same_block(b, block))
            .map(|(i, _)| i)
    }

    /// Replace `count` blocks starting at `start` with `replacement`.
    pub fn splice(&mut self, start: usize, count: usize, replacement: Vec<Bytes>) {
        let end = (start + count).min(self.blocks.len());
        let tail = self.blocks.split_off(end);
        self.blocks.truncate(start);
        for block in replacement {
            self.push_back(block);
        }
        self.blocks.extend(tail);
    }

    /// Chain with freshly allocated copies of every block.
    pub fn deep_copy(&self) -> ByteChain {
        ByteChain {
            blocks: self
                .blocks
                .iter()
                .map(|b| Bytes::copy_from_slice(b))
                .collect(),
        }
    }

    /// Split into `[0, at)` and `[at, len)` without copying.
    pub fn split_at(&self, at: usize) -> (ByteChain, ByteChain) {
        let mut head = ByteChain::new();
        let mut tail = ByteChain::new();
        let mut remaining = at;
        for block in &self.blocks {
            if remaining >= block.len() {
                remaining -= block.len();
                head.push_back(block.clone());
            } else if remaining > 0 {
                head.push_back(block.slice(..remaining));
                tail.push_back(block.slice(remaining..));
                remaining = 0;
            } else {
                tail.push_back(block.clone());
            }
        }
        (head, tail)
    }

    /// Contiguous copy of the chain contents.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }

    /// Vectored-I/O view of at most `max_blocks` leading blocks.
    pub fn io_slices(&self, max_blocks: usize) -> Vec<IoSlice<'_>> {
        self.blocks
            .iter()
            .take(max_blocks)
            .map(|b| IoSlice::new(b))
            .collect()
    }
}

impl From<Vec<Bytes>> for ByteChain {
    fn from(blocks: Vec<Bytes>) -> Self {
        let mut chain = ByteChain::new();
        for block in blocks {
            chain.push_back(block);
        }
        chain
    }
}
