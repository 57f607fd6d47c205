// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element queue and the visitors that walk it.
//!
//! Three traversals are supported:
//! - [`ElementQueue::accept_visitor`] - read-only walk with early stop
//! - [`ElementQueue::accept_remove_visitor`] - visitor may unlink the current element
//! - [`ElementQueue::accept_replace_visitor`] - visitor may swap the current slot

use std::collections::VecDeque;

use super::chain::ByteChain;
use super::element::{ElementRef, MatchCriteria, QueueElement, RemoveResult};

/// Whether a traversal continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

pub trait QueueVisitor {
    fn visit(&mut self, element: &ElementRef) -> Visit;
}

pub trait RemoveVisitor {
    /// Set `remove` to unlink `element` from the queue.
    fn visit_remove(&mut self, element: &ElementRef, remove: &mut bool) -> Visit;
}

pub trait ReplaceVisitor {
    fn visit_replace(&mut self, slot: &mut ElementRef) -> Visit;
}

/// FIFO of shared elements.
#[derive(Clone, Debug, Default)]
pub struct ElementQueue {
    elems: VecDeque<ElementRef>,
}

impl ElementQueue {
    pub fn new() -> Self {
        Self {
            elems: VecDeque::new(),
        }
    }

    pub fn put(&mut self, element: ElementRef) {
        self.elems.push_back(element);
    }

    pub fn get(&mut self) -> Option<ElementRef> {
        self.elems.pop_front()
    }

    pub fn peek(&self) -> Option<&ElementRef> {
        self.elems.front()
    }

    /// Swap the head element, returning the previous one.
    pub fn replace_head(&mut self, element: ElementRef) -> Option<ElementRef> {
        match self.elems.front_mut() {
            Some(head) => Some(std::mem::replace(head, element)),
            None => {
                self.elems.push_back(element);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementRef> + '_ {
        self.elems.iter()
    }

    /// Move every element out, leaving the queue empty.
    pub fn take(&mut self) -> ElementQueue {
        std::mem::take(self)
    }

    pub fn swap(&mut self, other: &mut ElementQueue) {
        std::mem::swap(&mut self.elems, &mut other.elems);
    }

    /// Sum of element wire sizes.
    pub fn total_len(&self) -> usize {
        self.elems.iter().map(|e| e.msg_len()).sum()
    }

    pub fn accept_visitor(&self, visitor: &mut dyn QueueVisitor) {
        for element in &self.elems {
            if visitor.visit(element) == Visit::Stop {
                break;
            }
        }
    }

    pub fn accept_remove_visitor(&mut self, visitor: &mut dyn RemoveVisitor) {
        let mut i = 0;
        while i < self.elems.len() {
            let mut remove = false;
            let next = visitor.visit_remove(&self.elems[i], &mut remove);
            if remove {
                self.elems.remove(i);
            } else {
                i += 1;
            }
            if next == Visit::Stop {
                break;
            }
        }
    }

    pub fn accept_replace_visitor(&mut self, visitor: &mut dyn ReplaceVisitor) {
        for slot in self.elems.iter_mut() {
            if visitor.visit_replace(slot) == Visit::Stop {
                break;
            }
        }
    }
}

impl FromIterator<ElementRef> for ElementQueue {
    fn from_iter<I: IntoIterator<Item = ElementRef>>(iter: I) -> Self {
        Self {
            elems: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Visitors
// ============================================================================

/// Unlinks elements matching a criteria, dropping each with
/// `dropped_by_transport = false`.
pub struct QueueRemoveVisitor<'a> {
    criteria: &'a dyn MatchCriteria,
    status: RemoveResult,
    removed_bytes: usize,
}

impl<'a> QueueRemoveVisitor<'a> {
    pub fn new(criteria: &'a dyn MatchCriteria) -> Self {
        Self {
            criteria,
            status: RemoveResult::NotFound,
            removed_bytes: 0,
        }
    }

    pub fn status(&self) -> RemoveResult {
        self.status
    }

    pub fn removed_bytes(&self) -> usize {
        self.removed_bytes
    }
}

impl RemoveVisitor for QueueRemoveVisitor<'_> {
    fn visit_remove(&mut self, element: &ElementRef, remove: &mut bool) -> Visit {
        if !self.criteria.matches(element) {
            return Visit::Continue;
        }
        *remove = true;
        self.removed_bytes += element.msg_len();
        let released = element.data_dropped(false);
        if released || self.status != RemoveResult::Released {
            self.status = if released {
                RemoveResult::Released
            } else {
                RemoveResult::Found
            };
        }
        if self.criteria.unique() {
            Visit::Stop
        } else {
            Visit::Continue
        }
    }
}

/// Unlinks every element, dropping each as dropped-by-transport.
#[derive(Debug, Default)]
pub struct RemoveAllVisitor {
    removed: usize,
    removed_bytes: usize,
}

impl RemoveAllVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    pub fn removed_bytes(&self) -> usize {
        self.removed_bytes
    }
}

impl RemoveVisitor for RemoveAllVisitor {
    fn visit_remove(&mut self, element: &ElementRef, remove: &mut bool) -> Visit {
        *remove = true;
        self.removed += 1;
        self.removed_bytes += element.msg_len();
        element.data_dropped(true);
        Visit::Continue
    }
}

/// Concatenates element wire bytes into one chain without copying.
#[derive(Debug, Default)]
pub struct BuildChainVisitor {
    chain: ByteChain,
}

impl BuildChainVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_chain(self) -> ByteChain {
        self.chain
    }
}

impl QueueVisitor for BuildChainVisitor {
    fn visit(&mut self, element: &ElementRef) -> Visit {
        self.chain.extend_shared(element.msg());
        Visit::Continue
    }
}

/// Fills `target` with retained copies of every visited element.
pub struct CopyChainVisitor<'a> {
    target: &'a mut ElementQueue,
}

impl<'a> CopyChainVisitor<'a> {
    pub fn new(target: &'a mut ElementQueue) -> Self {
        Self { target }
    }
}

impl QueueVisitor for CopyChainVisitor<'_> {
    fn visit(&mut self, element: &ElementRef) -> Visit {
        self.target.put(QueueElement::retained(element));
        Visit::Continue
    }
}
