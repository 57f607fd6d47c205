// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue elements: units of outbound data handed to the send strategy.
//!
//! Every element carries a marshaled sample header block followed by its
//! payload blocks. Elements are shared as [`ElementRef`] between the
//! strategy's packet, its backlog queue and the send buffer.
//!
//! # Loans
//!
//! An element starts with one sub-loan per interested destination. Each
//! `data_delivered()` / `data_dropped()` call returns one loan; the call
//! that returns the last loan releases the element and notifies its
//! listener exactly once. Fragments and per-destination copies
//! ([`ElementKind::Customized`]) forward their decision to the original,
//! whose loan count is raised once per extra fragment.
//!
//! ```text
//!   sample (loan 1) --fragment--> head, tail    original loan 2
//!   head.data_delivered()  -> original loan 1
//!   tail.data_delivered()  -> original loan 0 -> listener.data_delivered
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use super::chain::ByteChain;
use super::header::{MessageId, SampleHeader};
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::sequence::SequenceNumber;

/// Shared handle to a queue element.
pub type ElementRef = Arc<QueueElement>;

/// Receives the final delivery decision for an element.
pub trait SendListener: Send + Sync {
    fn data_delivered(&self, element: &QueueElement);
    fn data_dropped(&self, element: &QueueElement, dropped_by_transport: bool);
}

/// Element variants.
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// Application sample
    Sample,
    /// Transport or publication control message
    Control { exclusive: bool },
    /// Send-buffer copy sharing the wire bytes of a sent element
    Retained,
    /// Deep copy standing in for an element removed from an in-flight packet
    Replaced,
    /// Fragment or per-destination variant of `original`
    Customized { original: ElementRef, exclusive: bool },
}

/// Outcome of a removal attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RemoveResult {
    /// Packet chain and element queue disagree
    Error,
    #[default]
    NotFound,
    /// Removed, element still on loan elsewhere
    Found,
    /// Removed and released
    Released,
}

impl RemoveResult {
    /// Whether something was removed.
    pub fn is_removed(&self) -> bool {
        matches!(self, RemoveResult::Found | RemoveResult::Released)
    }
}

impl std::fmt::Display for RemoveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoveResult::Error => "error",
            RemoveResult::NotFound => "not-found",
            RemoveResult::Found => "found",
            RemoveResult::Released => "released",
        };
        write!(f, "{}", s)
    }
}

/// Unit of outbound data.
pub struct QueueElement {
    kind: ElementKind,
    publication_id: GUID,
    subscription_id: Option<GUID>,
    header: SampleHeader,
    /// Sample header block followed by payload blocks
    msg: ByteChain,
    sub_loan: AtomicU32,
    dropped: AtomicBool,
    released: AtomicBool,
    listener: Option<Arc<dyn SendListener>>,
}

impl std::fmt::Debug for QueueElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueElement")
            .field("kind", &self.kind_name())
            .field("publication_id", &self.publication_id)
            .field("sequence", &self.header.sequence)
            .field("fragment_number", &self.header.fragment_number)
            .field("msg_len", &self.msg_len())
            .finish()
    }
}

impl QueueElement {
    fn build(
        kind: ElementKind,
        header: SampleHeader,
        payload: ByteChain,
        subscription_id: Option<GUID>,
        listener: Option<Arc<dyn SendListener>>,
    ) -> Self {
        let mut header = header;
        header.message_length = payload.total_len() as u32;
        let mut msg = ByteChain::from_bytes(header.encode());
        msg.extend_shared(&payload);
        Self {
            kind,
            publication_id: header.publication_id,
            subscription_id,
            header,
            msg,
            sub_loan: AtomicU32::new(1),
            dropped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            listener,
        }
    }

    /// Application sample.
    pub fn sample(
        publication_id: GUID,
        sequence: SequenceNumber,
        payload: Bytes,
        listener: Option<Arc<dyn SendListener>>,
    ) -> Self {
        let header = SampleHeader::new(MessageId::SampleData, publication_id, sequence);
        Self::build(
            ElementKind::Sample,
            header,
            ByteChain::from_bytes(payload),
            None,
            listener,
        )
    }

    /// Control message. `exclusive` messages always travel alone.
    pub fn control(
        publication_id: GUID,
        payload: Bytes,
        exclusive: bool,
        listener: Option<Arc<dyn SendListener>>,
    ) -> Self {
        let header = SampleHeader::new(MessageId::Control, publication_id, SequenceNumber::ZERO);
        Self::build(
            ElementKind::Control { exclusive },
            header,
            ByteChain::from_bytes(payload),
            None,
            listener,
        )
    }

    /// Builder: direct the element at one subscription
    pub fn with_subscription(mut self, subscription_id: GUID) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    /// Builder: number of decisions required before release
    pub fn with_loans(self, loans: u32) -> Self {
        self.sub_loan.store(loans.max(1), Ordering::Relaxed);
        self
    }

    /// Wrap in an [`ElementRef`].
    pub fn into_ref(self) -> ElementRef {
        Arc::new(self)
    }

    /// Send-buffer copy sharing `original`'s wire bytes.
    pub fn retained(original: &QueueElement) -> ElementRef {
        Arc::new(Self {
            kind: ElementKind::Retained,
            publication_id: original.publication_id,
            subscription_id: original.subscription_id,
            header: original.header,
            msg: original.msg.clone(),
            sub_loan: AtomicU32::new(1),
            dropped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            listener: None,
        })
    }

    /// Deep copy of `original` owning private wire bytes.
    pub fn replaced(original: &QueueElement) -> ElementRef {
        Arc::new(Self {
            kind: ElementKind::Replaced,
            publication_id: original.publication_id,
            subscription_id: original.subscription_id,
            header: original.header,
            msg: original.msg.deep_copy(),
            sub_loan: AtomicU32::new(1),
            dropped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            listener: None,
        })
    }

    /// Per-destination variant of `original` carrying its own payload.
    pub fn customized(original: &ElementRef, subscription_id: GUID, payload: Bytes) -> ElementRef {
        let root = original.root();
        let exclusive = original.requires_exclusive_packet();
        Arc::new(Self::build(
            ElementKind::Customized {
                original: root,
                exclusive,
            },
            original.header,
            ByteChain::from_bytes(payload),
            Some(subscription_id),
            None,
        ))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            ElementKind::Sample => "sample",
            ElementKind::Control { .. } => "control",
            ElementKind::Retained => "retained",
            ElementKind::Replaced => "replaced",
            ElementKind::Customized { .. } => "customized",
        }
    }

    pub fn publication_id(&self) -> GUID {
        self.publication_id
    }

    pub fn subscription_id(&self) -> Option<GUID> {
        self.subscription_id
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.header.sequence
    }

    pub fn header(&self) -> &SampleHeader {
        &self.header
    }

    /// Wire bytes: sample header then payload.
    pub fn msg(&self) -> &ByteChain {
        &self.msg
    }

    pub fn msg_len(&self) -> usize {
        self.msg.total_len()
    }

    /// Payload blocks (everything after the sample header).
    pub fn msg_payload(&self) -> ByteChain {
        let (_, payload) = self.msg.split_at(SampleHeader::SIZE);
        payload
    }

    /// Identity of the application payload, shared by all fragments and
    /// per-destination copies of one sample.
    ///
    /// Keyed on the original element, not the payload bytes: empty payloads
    /// have no block and separate samples may share one static buffer.
    pub fn payload_identity(&self) -> usize {
        match &self.kind {
            ElementKind::Customized { original, .. } => original.payload_identity(),
            _ => self as *const Self as usize,
        }
    }

    /// Outermost original (self for non-customized elements).
    pub fn root(self: &Arc<Self>) -> ElementRef {
        match &self.kind {
            ElementKind::Customized { original, .. } => Arc::clone(original),
            _ => Arc::clone(self),
        }
    }

    /// Whether `other` is this element or the original it stands for.
    pub fn is_same_sample(&self, other: &QueueElement) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        match &self.kind {
            ElementKind::Customized { original, .. } => std::ptr::eq(Arc::as_ptr(original), other),
            _ => false,
        }
    }

    pub fn requires_exclusive_packet(&self) -> bool {
        match self.kind {
            ElementKind::Control { exclusive } => exclusive,
            ElementKind::Customized { exclusive, .. } => exclusive,
            _ => false,
        }
    }

    /// Whether this is a control message of `publication_id`.
    pub fn is_control(&self, publication_id: GUID) -> bool {
        matches!(self.kind, ElementKind::Control { .. }) && self.publication_id == publication_id
    }

    pub fn is_retained_replaced(&self) -> bool {
        matches!(self.kind, ElementKind::Retained | ElementKind::Replaced)
    }

    pub fn is_replaced(&self) -> bool {
        matches!(self.kind, ElementKind::Replaced)
    }

    pub fn is_fragment(&self) -> bool {
        self.header.fragment
    }

    pub fn is_first_fragment(&self) -> bool {
        self.header.fragment && self.header.fragment_number == 1
    }

    pub fn is_last_fragment(&self) -> bool {
        self.header.fragment && !self.header.more_fragments
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn sub_loan_count(&self) -> u32 {
        self.sub_loan.load(Ordering::Acquire)
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// Take one more loan (one more decision required before release).
    pub fn add_loan(&self) {
        self.sub_loan.fetch_add(1, Ordering::AcqRel);
    }

    /// Return one loan as delivered. Returns true if this released the element.
    pub fn data_delivered(&self) -> bool {
        self.decision_made(false)
    }

    /// Return one loan as dropped. Returns true if this released the element.
    pub fn data_dropped(&self, dropped_by_transport: bool) -> bool {
        self.dropped.store(true, Ordering::Release);
        self.decision_made(dropped_by_transport)
    }

    fn decision_made(&self, dropped_by_transport: bool) -> bool {
        let prev = self
            .sub_loan
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                self.release(dropped_by_transport);
                true
            }
            Ok(_) => false,
            Err(_) => {
                log::warn!(
                    "[element] decision on already released {} seq={}",
                    self.kind_name(),
                    self.header.sequence
                );
                false
            }
        }
    }

    fn release(&self, dropped_by_transport: bool) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.dropped.load(Ordering::Acquire);
        match &self.kind {
            ElementKind::Customized { original, .. } => {
                if dropped {
                    original.data_dropped(dropped_by_transport);
                } else {
                    original.data_delivered();
                }
            }
            ElementKind::Sample | ElementKind::Control { .. } => {
                if let Some(listener) = &self.listener {
                    if dropped {
                        listener.data_dropped(self, dropped_by_transport);
                    } else {
                        listener.data_delivered(self);
                    }
                }
            }
            ElementKind::Retained | ElementKind::Replaced => {}
        }
    }

    // ========================================================================
    // Fragmentation
    // ========================================================================

    /// Split into a head whose wire size (header included) is `size` bytes
    /// and a tail holding the rest of the payload.
    ///
    /// Both fragments forward their decision to the root original, whose
    /// loan count is raised by one.
    pub fn fragment(self: &Arc<Self>, size: usize) -> Result<(ElementRef, ElementRef)> {
        let payload = self.msg_payload();
        let payload_len = payload.total_len();
        if size <= SampleHeader::SIZE {
            return Err(Error::FragmentationFailed(format!(
                "fragment size {} cannot carry a {}-byte header",
                size,
                SampleHeader::SIZE
            )));
        }
        let head_len = size - SampleHeader::SIZE;
        if head_len >= payload_len {
            return Err(Error::FragmentationFailed(format!(
                "payload of {} bytes does not need splitting at {}",
                payload_len, size
            )));
        }

        let (head_payload, tail_payload) = payload.split_at(head_len);
        let root = self.root();
        let exclusive = self.requires_exclusive_packet();
        let first_number = if self.is_fragment() {
            self.header.fragment_number
        } else {
            1
        };

        let mut head_header = self.header;
        head_header.fragment = true;
        head_header.more_fragments = true;
        head_header.fragment_number = first_number;

        let mut tail_header = self.header;
        tail_header.fragment = true;
        tail_header.more_fragments = self.is_fragment() && self.header.more_fragments;
        tail_header.fragment_number = first_number + 1;

        root.add_loan();
        let kind = ElementKind::Customized {
            original: Arc::clone(&root),
            exclusive,
        };
        let head = Arc::new(Self::build(
            kind.clone(),
            head_header,
            head_payload,
            self.subscription_id,
            None,
        ));
        let tail = Arc::new(Self::build(
            kind,
            tail_header,
            tail_payload,
            self.subscription_id,
            None,
        ));

        // A fragment that is itself split hands its own loan over to the
        // new pair; the root already counts both of them.
        if !Arc::ptr_eq(&root, self) {
            self.sub_loan.store(0, Ordering::Release);
            self.released.store(true, Ordering::Release);
        }

        Ok((head, tail))
    }
}

// ============================================================================
// Match criteria
// ============================================================================

/// Predicate used by removal visitors.
pub trait MatchCriteria {
    fn matches(&self, element: &QueueElement) -> bool;
    /// At most one element can match.
    fn unique(&self) -> bool;
}

/// Every element of one publication.
#[derive(Clone, Copy, Debug)]
pub struct MatchOnPubId {
    pub publication_id: GUID,
}

impl MatchOnPubId {
    pub fn new(publication_id: GUID) -> Self {
        Self { publication_id }
    }
}

impl MatchCriteria for MatchOnPubId {
    fn matches(&self, element: &QueueElement) -> bool {
        element.publication_id() == self.publication_id
    }

    fn unique(&self) -> bool {
        false
    }
}

/// The element(s) carrying one application payload.
#[derive(Clone, Copy, Debug)]
pub struct MatchOnDataPayload {
    identity: usize,
}

impl MatchOnDataPayload {
    pub fn new(element: &QueueElement) -> Self {
        Self {
            identity: element.payload_identity(),
        }
    }
}

impl MatchCriteria for MatchOnDataPayload {
    fn matches(&self, element: &QueueElement) -> bool {
        !element.is_retained_replaced() && element.payload_identity() == self.identity
    }

    fn unique(&self) -> bool {
        true
    }
}

/// One specific element (or a fragment standing for it).
#[derive(Clone, Debug)]
pub struct MatchOnElement {
    element: ElementRef,
}

impl MatchOnElement {
    pub fn new(element: ElementRef) -> Self {
        Self { element }
    }
}

impl MatchCriteria for MatchOnElement {
    fn matches(&self, element: &QueueElement) -> bool {
        element.is_same_sample(&self.element)
    }

    fn unique(&self) -> bool {
        true
    }
}
