// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send strategy: packet assembly and the backpressure state machine.
//!
//! Elements handed to [`SendStrategy::send`] are coalesced into packets and
//! written to a [`TransportLink`]. While the link keeps up the strategy
//! stays in `Direct` mode and writes synchronously; once it pushes back the
//! strategy parks new elements in a backlog and a worker thread drains it.
//!
//! ```text
//!            backpressure / partial send
//!   Direct ------------------------------> Queue
//!     ^  <-- backlog drained, full send --   |
//!     |                                      | peer lost / send error
//!     |         relink restored              v
//!     +--------------------------------- Suspend
//!                                            | relink failed / retries exhausted
//!                                            v
//!                                        Terminated
//! ```
//!
//! Packets are a [`PacketHeader`] followed by the sample header and payload
//! blocks of each element, all sharing storage with the elements. After a
//! partial write the unsent suffix stays as the current packet and elements
//! complete as their last block leaves.
//!
//! Completion callbacks are collected while the strategy lock is held and
//! delivered after it is released, so a listener may call back into the
//! strategy.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use super::chain::{same_block, ByteChain};
use super::element::{
    ElementRef, MatchCriteria, MatchOnDataPayload, MatchOnElement, MatchOnPubId, QueueElement,
    RemoveResult,
};
use super::header::{PacketHeader, SampleHeader};
use super::link::{is_backpressure, send_chain, RelinkStatus, TransportLink};
use super::metrics::SendMetrics;
use super::packet_remove::PacketRemoveVisitor;
use super::queue::{BuildChainVisitor, ElementQueue, QueueRemoveVisitor};
use super::send_buffer::SendBuffer;
use super::thread_synch::{SynchWorker, ThreadSynch, WorkNotifier, WorkOutcome};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::sequence::{DisjointSequence, SequenceNumber, SequenceRange};

/// Smallest payload worth carrying in a fragment.
pub const MIN_FRAGMENT_SIZE: usize = 68;

/// How `send()` treats new elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SendMode {
    #[default]
    NotSet,
    /// No backlog, packets written as they fill
    Direct,
    /// Link pushed back, elements join the backlog
    Queue,
    /// Link lost, elements join the backlog but nothing is written
    Suspend,
    /// Link gone for good, elements are dropped
    Terminated,
}

impl std::fmt::Display for SendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SendMode::NotSet => "not-set",
            SendMode::Direct => "direct",
            SendMode::Queue => "queue",
            SendMode::Suspend => "suspend",
            SendMode::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// Result of one packet write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendPacketOutcome {
    CompleteSend,
    PartialSend,
    Backpressure,
    PeerLost,
    SendError,
}

/// Packet, backlog and mode, guarded by one lock.
#[derive(Debug, Default)]
struct StrategyState {
    mode: SendMode,
    mode_before_suspend: SendMode,
    /// Current packet header; `length` counts unsent element bytes
    header: PacketHeader,
    /// Last packet sequence assigned
    header_sequence: SequenceNumber,
    /// Unsent bytes of the current packet
    pkt_chain: ByteChain,
    /// Packet header block already written
    header_complete: bool,
    /// Current packet already copied to the send buffer
    packet_retained: bool,
    /// Elements of the current packet
    elems: ElementQueue,
    /// Backlog
    queue: ElementQueue,
    /// Completed elements awaiting notification, with the mode at completion
    delayed: Vec<(ElementRef, SendMode)>,
    start_counter: u32,
    graceful_disconnecting: bool,
    link_released: bool,
    relink_attempts: u32,
}

/// Packet assembler for one link.
pub struct SendStrategy {
    config: TransportConfig,
    link: Arc<dyn TransportLink>,
    send_buffer: Option<Arc<SendBuffer>>,
    state: Mutex<StrategyState>,
    worker: Mutex<Option<ThreadSynch>>,
    metrics: Arc<SendMetrics>,
}

impl SendStrategy {
    /// Strategy writing to `link`, starting in `Direct` mode.
    pub fn new(config: TransportConfig, link: Arc<dyn TransportLink>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let state = StrategyState {
            mode: SendMode::Direct,
            ..StrategyState::default()
        };
        Ok(Self {
            config,
            link,
            send_buffer: None,
            state: Mutex::new(state),
            worker: Mutex::new(None),
            metrics: Arc::new(SendMetrics::new()),
        })
    }

    /// Builder: retain sent packets for resend
    pub fn with_send_buffer(mut self, buffer: Arc<SendBuffer>) -> Self {
        self.send_buffer = Some(buffer);
        self
    }

    /// Builder: count into shared metrics
    pub fn with_metrics(mut self, metrics: Arc<SendMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Builder: participant prefix stamped into packet headers
    pub fn with_source(self, source: [u8; 12]) -> Self {
        self.state.lock().header.source = source;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<SendMetrics> {
        &self.metrics
    }

    pub fn send_buffer(&self) -> Option<&Arc<SendBuffer>> {
        self.send_buffer.as_ref()
    }

    pub fn mode(&self) -> SendMode {
        self.state.lock().mode
    }

    pub fn is_direct_mode(&self) -> bool {
        self.mode() == SendMode::Direct
    }

    /// Whether a per-connection worker thread is alive.
    pub fn worker_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(ThreadSynch::is_running)
    }

    /// Elements waiting in the backlog.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Elements in the current packet.
    pub fn packet_elements(&self) -> usize {
        self.state.lock().elems.len()
    }

    /// Unsent element bytes in the current packet.
    pub fn packet_length(&self) -> usize {
        self.state.lock().header.length as usize
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the per-connection worker (when configured).
    ///
    /// Also restarts a worker that exited after the link broke, e.g. once
    /// `resume_send()` revived a terminated strategy.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if !self.config.thread_per_connection {
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(ThreadSynch::is_running) {
            return Ok(());
        }
        // A worker that saw the link break has exited; replace it.
        if let Some(mut stale) = worker.take() {
            stale.stop();
        }
        let weak: Weak<dyn SynchWorker> = Arc::downgrade(self) as Weak<dyn SynchWorker>;
        *worker = Some(ThreadSynch::spawn(
            weak,
            "hdds-send",
            self.config.clogged_retry_delay,
        )?);
        Ok(())
    }

    /// Stop the worker and drop everything still pending.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        drop(worker);
        {
            let mut state = self.state.lock();
            let dropped = state.elems.len() + state.queue.len();
            if dropped > 0 {
                log::debug!("[send] stop: dropping {} pending elements", dropped);
            }
            state.pkt_chain = ByteChain::new();
            state.header.length = 0;
            state.header_complete = false;
            Self::drop_pending(&mut state);
        }
        self.send_delayed_notifications(None);
    }

    /// Reset packet and backlog, switching to `new_mode`.
    ///
    /// With `old_mode` other than `NotSet` nothing happens unless the
    /// strategy is currently in `old_mode`. The unsent part of the current
    /// packet counts as sent; backlog elements are dropped.
    pub fn clear(&self, new_mode: SendMode, old_mode: SendMode) {
        self.send_delayed_notifications(None);
        {
            let mut state = self.state.lock();
            if old_mode != SendMode::NotSet && state.mode != old_mode {
                return;
            }
            self.clear_locked(&mut state, new_mode);
        }
        self.send_delayed_notifications(None);
    }

    /// Switch to `Terminated`.
    ///
    /// `graceful` keeps the send path open for the disconnect handshake.
    pub fn terminate_send(&self, graceful: bool) {
        let reset_flag = {
            let state = self.state.lock();
            !(matches!(state.mode, SendMode::Terminated | SendMode::Suspend)
                && !state.graceful_disconnecting)
        };
        self.clear(SendMode::Terminated, SendMode::NotSet);
        if reset_flag {
            self.state.lock().graceful_disconnecting = graceful;
        }
    }

    /// Stop writing; new elements are kept in the backlog.
    pub fn suspend_send(&self) {
        let mut state = self.state.lock();
        if !matches!(state.mode, SendMode::Suspend | SendMode::Terminated) {
            state.mode_before_suspend = state.mode;
            self.set_mode(&mut state, SendMode::Suspend);
        }
    }

    /// Resume writing after a relink.
    pub fn resume_send(&self) {
        {
            let mut state = self.state.lock();
            let resumed = match state.mode {
                SendMode::Suspend => match state.mode_before_suspend {
                    SendMode::NotSet => SendMode::Direct,
                    previous => previous,
                },
                SendMode::Terminated => SendMode::Direct,
                current => current,
            };
            self.set_mode(&mut state, resumed);
            state.mode_before_suspend = SendMode::NotSet;
            state.relink_attempts = 0;
            if state.header.length == 0 && state.queue.is_empty() {
                return;
            }
            self.set_mode(&mut state, SendMode::Queue);
        }
        self.work_available();
    }

    /// While released, sent elements complete immediately.
    pub fn link_released(&self, released: bool) {
        self.state.lock().link_released = released;
    }

    pub fn set_graceful_disconnecting(&self, graceful: bool) {
        self.state.lock().graceful_disconnecting = graceful;
    }

    // ========================================================================
    // Send path
    // ========================================================================

    /// Open a batch; the packet is not flushed by `send_stop()` until every
    /// batch is closed.
    pub fn send_start(&self) {
        let mut state = self.state.lock();
        if !state.link_released {
            state.start_counter += 1;
        }
    }

    /// Close a batch, flushing the pending packet when it was the last one.
    pub fn send_stop(&self) {
        {
            let mut state = self.state.lock();
            if state.link_released || state.start_counter == 0 {
                return;
            }
            state.start_counter -= 1;
            if state.start_counter != 0 {
                return;
            }
            if state.mode == SendMode::Terminated && !state.graceful_disconnecting {
                return;
            }
            if matches!(state.mode, SendMode::Queue | SendMode::Suspend) {
                return;
            }
            if state.header.length > 0 && !state.elems.is_empty() {
                self.direct_send(&mut state, true);
                if state.mode == SendMode::Queue {
                    self.work_available();
                }
            }
        }
        self.send_delayed_notifications(None);
    }

    /// Hand `element` to the transport.
    ///
    /// `relink` allows a failed flush to try re-establishing the link.
    pub fn send(&self, element: ElementRef, relink: bool) {
        {
            let mut state = self.state.lock();
            if state.link_released {
                Self::add_delayed_notification(&mut state, element, self.config.max_samples_per_packet);
            } else {
                if state.mode == SendMode::Terminated && !state.graceful_disconnecting {
                    drop(state);
                    self.drop_element(&element, "link terminated");
                    return;
                }
                self.send_locked(&mut state, element, relink);
            }
        }
        self.send_delayed_notifications(None);
    }

    fn send_locked(&self, state: &mut StrategyState, element: ElementRef, relink: bool) {
        let mut element = element;
        let mut element_length = element.msg_len();
        let fragmenting = self.config.fragmentation_enabled();

        if !fragmenting && PacketHeader::SIZE + element_length > self.config.max_packet_size {
            log::error!(
                "[send] element seq={} of {} bytes exceeds max packet size {}",
                element.sequence(),
                element_length,
                self.config.max_packet_size
            );
            self.reject(state, element);
            return;
        }

        if matches!(state.mode, SendMode::Queue | SendMode::Suspend) {
            self.enqueue(state, element);
            return;
        }

        let exclusive = element.requires_exclusive_packet();
        let space_needed = if fragmenting {
            SampleHeader::SIZE + MIN_FRAGMENT_SIZE
        } else {
            element_length
        };
        if (exclusive && !state.elems.is_empty()) || self.space_available_locked(state) < space_needed {
            if self.config.debug.log_send_details {
                log::debug!(
                    "[send] flushing {} elements ({} bytes) before seq={}",
                    state.elems.len(),
                    state.header.length,
                    element.sequence()
                );
            }
            self.direct_send(state, relink);
            match state.mode {
                SendMode::Queue | SendMode::Suspend => {
                    self.enqueue(state, element);
                    return;
                }
                SendMode::Terminated if !state.graceful_disconnecting => {
                    self.reject(state, element);
                    return;
                }
                _ => {}
            }
        }

        let mut first_pkt = true;
        let mut next_fragment: Option<ElementRef> = None;
        while first_pkt || next_fragment.is_some() {
            if !matches!(state.mode, SendMode::Direct | SendMode::Terminated) {
                break;
            }
            let remainder = match next_fragment.take() {
                Some(fragment) => {
                    element = fragment;
                    element_length = element.msg_len();
                    true
                }
                None => false,
            };
            if state.elems.is_empty() {
                state.header.first_fragment = false;
                state.header.last_fragment = false;
            }

            if fragmenting {
                let avail = self.space_available_locked(state);
                if element_length > avail {
                    match element.fragment(avail) {
                        Ok((head, tail)) => {
                            self.metrics.record_fragments(1);
                            element = head;
                            element_length = element.msg_len();
                            next_fragment = Some(tail);
                            state.header.first_fragment = first_pkt;
                            state.header.last_fragment = false;
                        }
                        Err(e) => {
                            log::error!("[send] fragmentation failed: {}", e);
                            self.reject(state, element);
                            return;
                        }
                    }
                } else if remainder {
                    state.header.first_fragment = false;
                    state.header.last_fragment = true;
                }
            }
            first_pkt = false;

            state.elems.put(Arc::clone(&element));
            state.header.length += element_length as u32;
            let message_length = state.header.length as usize;

            if next_fragment.is_some()
                || state.elems.len() >= self.config.max_samples_per_packet
                || PacketHeader::SIZE + message_length > self.config.optimum_packet_size
                || exclusive
            {
                self.direct_send(state, relink);
                if state.mode != SendMode::Direct {
                    if let Some(fragment) = next_fragment.take() {
                        if state.mode == SendMode::Queue {
                            self.enqueue(state, fragment);
                        } else {
                            self.reject(state, fragment);
                        }
                    } else if state.mode == SendMode::Queue {
                        self.work_available();
                    }
                }
            }
        }
    }

    /// Park `element` in the backlog.
    fn enqueue(&self, state: &mut StrategyState, element: ElementRef) {
        if self.config.debug.log_send_details {
            log::debug!(
                "[send] mode {}: queueing seq={} ({} queued)",
                state.mode,
                element.sequence(),
                state.queue.len() + 1
            );
        }
        state.queue.put(element);
        self.metrics.record_element_queued();
        if state.mode == SendMode::Queue {
            self.work_available();
        }
    }

    /// Schedule `element` to be reported dropped by the transport.
    fn reject(&self, state: &mut StrategyState, element: ElementRef) {
        self.metrics.record_element_dropped();
        if self.config.debug.log_dropped_messages {
            log::debug!("[send] dropping seq={}", element.sequence());
        }
        state.delayed.push((element, SendMode::Terminated));
    }

    fn drop_element(&self, element: &ElementRef, reason: &str) {
        self.metrics.record_element_dropped();
        if self.config.debug.log_dropped_messages {
            log::debug!("[send] dropping seq={}: {}", element.sequence(), reason);
        }
        element.data_dropped(true);
    }

    fn add_delayed_notification(state: &mut StrategyState, element: ElementRef, max_samples: usize) {
        let size = state.delayed.len();
        if size > 0 && max_samples > 0 && size % max_samples == 0 {
            log::debug!("[send] notification queue threshold, size={}", size);
        }
        let mode = state.mode;
        state.delayed.push((element, mode));
    }

    /// Bytes still available for elements in the current packet.
    pub fn space_available(&self) -> usize {
        let state = self.state.lock();
        self.space_available_locked(&state)
    }

    fn space_available_locked(&self, state: &StrategyState) -> usize {
        let max = match self.config.max_message_size {
            0 => self.config.max_packet_size,
            max_msg => self.config.max_packet_size.min(max_msg),
        };
        max.saturating_sub(PacketHeader::SIZE + state.header.length as usize)
    }

    /// Split `element` into pieces that each fit the space currently
    /// available. Each piece holds one loan on the original.
    pub fn fragmentation_helper(&self, element: &ElementRef) -> Result<Vec<ElementRef>> {
        let space = self.space_available();
        let mut pieces = Vec::new();
        let mut current = Arc::clone(element);
        while current.msg_len() > space {
            let (head, tail) = current.fragment(space)?;
            self.metrics.record_fragments(1);
            pieces.push(head);
            current = tail;
        }
        pieces.push(current);
        Ok(pieces)
    }

    // ========================================================================
    // Packet I/O
    // ========================================================================

    fn prepare_packet(&self, state: &mut StrategyState) {
        state.header_sequence = state.header_sequence.next();
        state.header.sequence = state.header_sequence;
        let mut chain = ByteChain::from_bytes(state.header.encode());
        let mut build = BuildChainVisitor::new();
        state.elems.accept_visitor(&mut build);
        chain.extend_shared(&build.into_chain());
        state.pkt_chain = chain;
        state.header_complete = false;
        state.packet_retained = false;
        if self.config.debug.log_send_details {
            log::debug!(
                "[send] prepared packet seq={} with {} elements ({} bytes)",
                state.header.sequence,
                state.elems.len(),
                state.header.length
            );
        }
    }

    /// Flush the current packet, reacting to the outcome.
    fn direct_send(&self, state: &mut StrategyState, do_relink: bool) {
        if state.elems.is_empty() {
            return;
        }
        self.prepare_packet(state);
        loop {
            match self.send_packet(state) {
                SendPacketOutcome::Backpressure | SendPacketOutcome::PartialSend => {
                    self.set_mode(state, SendMode::Queue);
                }
                SendPacketOutcome::PeerLost | SendPacketOutcome::SendError => {
                    self.enter_suspend(state);
                    if do_relink {
                        self.relink(state, false);
                        if !matches!(state.mode, SendMode::Suspend | SendMode::Terminated) {
                            continue;
                        }
                    }
                }
                SendPacketOutcome::CompleteSend => {}
            }
            break;
        }
    }

    fn send_packet(&self, state: &mut StrategyState) -> SendPacketOutcome {
        let total = state.pkt_chain.total_len();
        match send_chain(&*self.link, &state.pkt_chain) {
            Ok(0) => {
                log::debug!("[send] peer lost on packet seq={}", state.header.sequence);
                self.metrics.record_peer_lost();
                SendPacketOutcome::PeerLost
            }
            Err(e) if is_backpressure(&e) => {
                self.metrics.record_backpressure();
                SendPacketOutcome::Backpressure
            }
            Err(e) => {
                log::warn!("[send] send failed on packet seq={}: {}", state.header.sequence, e);
                self.metrics.record_send_error();
                SendPacketOutcome::SendError
            }
            Ok(sent) => {
                if let Some(buffer) = &self.send_buffer {
                    if !state.packet_retained {
                        buffer.insert(state.header.sequence, &state.elems, &state.pkt_chain);
                        state.packet_retained = true;
                    }
                }
                if self.adjust_packet_after_send(state, sent) {
                    self.metrics.record_packet_sent(sent);
                    SendPacketOutcome::CompleteSend
                } else {
                    if self.config.debug.log_send_details {
                        log::debug!("[send] partial send: {} of {} bytes", sent, total);
                    }
                    self.metrics.record_partial_send(sent);
                    SendPacketOutcome::PartialSend
                }
            }
        }
    }

    /// Drop `sent` bytes from the front of the current packet.
    ///
    /// Elements whose last block has gone out complete. Returns true once
    /// the whole packet is sent.
    fn adjust_packet_after_send(&self, state: &mut StrategyState, sent: usize) -> bool {
        let mut left = sent;
        let mut non_header_sent = 0usize;
        let mut tail = Self::front_tail_block(&state.elems);

        while left > 0 {
            let Some(block_len) = state.pkt_chain.front().map(Bytes::len) else {
                break;
            };
            if block_len <= left {
                let Some(block) = state.pkt_chain.pop_front() else {
                    break;
                };
                left -= block_len;
                if !state.header_complete {
                    state.header_complete = true;
                    continue;
                }
                non_header_sent += block_len;
                if tail.as_ref().is_some_and(|t| same_block(&block, t)) {
                    if let Some(done) = state.elems.get() {
                        Self::add_delayed_notification(state, done, self.config.max_samples_per_packet);
                    }
                    tail = Self::front_tail_block(&state.elems);
                }
            } else {
                state.pkt_chain.advance_front(left);
                if state.header_complete {
                    non_header_sent += left;
                }
                left = 0;
            }
        }

        state.header.length = state.header.length.saturating_sub(non_header_sent as u32);
        state.header.length == 0
    }

    fn front_tail_block(elems: &ElementQueue) -> Option<Bytes> {
        elems.peek().and_then(|e| e.msg().back().cloned())
    }

    /// Fill an empty packet from the backlog.
    fn get_packet_elems_from_queue(&self, state: &mut StrategyState) {
        state.header.first_fragment = false;
        state.header.last_fragment = false;
        while let Some(head) = state.queue.peek().cloned() {
            let exclusive = head.requires_exclusive_packet();
            if exclusive && !state.elems.is_empty() {
                break;
            }
            let mut element_length = head.msg_len();
            let avail = self.space_available_locked(state);
            let mut fragment = None;
            if element_length > avail {
                if !self.config.fragmentation_enabled() {
                    break;
                }
                match head.fragment(avail) {
                    Ok((first, rest)) => {
                        self.metrics.record_fragments(1);
                        state.header.first_fragment = !head.is_fragment();
                        element_length = first.msg_len();
                        state.queue.replace_head(rest);
                        fragment = Some(first);
                    }
                    Err(e) if !state.elems.is_empty() => {
                        // Stays at the queue head for the next packet.
                        log::debug!("[send] queued seq={} waits for next packet: {}", head.sequence(), e);
                        break;
                    }
                    Err(e) => {
                        log::error!("[send] fragmentation of queued seq={} failed: {}", head.sequence(), e);
                        if let Some(bad) = state.queue.get() {
                            self.reject(state, bad);
                        }
                        continue;
                    }
                }
            }
            let fragmented = fragment.is_some();
            let element = match fragment {
                Some(first) => first,
                None => match state.queue.get() {
                    Some(element) => element,
                    None => break,
                },
            };
            if state.header.length == 0 {
                state.header.last_fragment = !fragmented && element.is_last_fragment();
            }
            state.elems.put(element);
            state.header.length += element_length as u32;

            if exclusive
                || fragmented
                || state.elems.len() >= self.config.max_samples_per_packet
                || state.header.length as usize >= self.config.optimum_packet_size
            {
                break;
            }
        }
    }

    /// One unit of background work: build a packet from the backlog (or
    /// continue a partial one) and write it.
    pub fn perform_work(&self) -> WorkOutcome {
        let outcome;
        let mode_after;
        {
            let mut state = self.state.lock();
            match state.mode {
                SendMode::Terminated => return WorkOutcome::BrokenResource,
                SendMode::Queue => {}
                // Suspended strategies wait for resume_send().
                _ => return WorkOutcome::NoMoreToDo,
            }

            if state.header.length == 0 {
                self.get_packet_elems_from_queue(&mut state);
                if state.elems.is_empty() {
                    self.set_mode(&mut state, SendMode::Direct);
                    drop(state);
                    self.send_delayed_notifications(None);
                    return WorkOutcome::NoMoreToDo;
                }
                self.prepare_packet(&mut state);
            }

            outcome = self.send_packet(&mut state);
            match outcome {
                SendPacketOutcome::CompleteSend if state.queue.is_empty() => {
                    self.set_mode(&mut state, SendMode::Direct);
                }
                SendPacketOutcome::PeerLost | SendPacketOutcome::SendError => {
                    self.enter_suspend(&mut state);
                    self.relink(&mut state, true);
                }
                _ => {}
            }
            mode_after = state.mode;
        }
        self.send_delayed_notifications(None);

        match outcome {
            SendPacketOutcome::CompleteSend if mode_after == SendMode::Direct => WorkOutcome::NoMoreToDo,
            SendPacketOutcome::PeerLost | SendPacketOutcome::SendError => match mode_after {
                SendMode::Suspend => WorkOutcome::NoMoreToDo,
                SendMode::Terminated => WorkOutcome::BrokenResource,
                _ => WorkOutcome::MoreToDo,
            },
            SendPacketOutcome::Backpressure => WorkOutcome::CloggedResource,
            _ => WorkOutcome::MoreToDo,
        }
    }

    // ========================================================================
    // Mode and relink
    // ========================================================================

    fn set_mode(&self, state: &mut StrategyState, mode: SendMode) {
        if state.mode != mode {
            log::debug!("[send] mode {} -> {}", state.mode, mode);
            self.metrics.record_mode_change();
            state.mode = mode;
        }
    }

    fn enter_suspend(&self, state: &mut StrategyState) {
        if state.mode != SendMode::Suspend {
            state.mode_before_suspend = state.mode;
            self.set_mode(state, SendMode::Suspend);
        }
    }

    /// Ask the link to reconnect, terminating once it cannot.
    fn relink(&self, state: &mut StrategyState, do_suspend: bool) {
        state.relink_attempts += 1;
        self.metrics.record_relink();
        let max = self.config.max_reconnect_attempts;
        if max > 0 && state.relink_attempts > max {
            log::warn!("[send] giving up after {} relink attempts", max);
            self.clear_locked(state, SendMode::Terminated);
            return;
        }
        match self.link.relink(do_suspend) {
            RelinkStatus::Restored => {
                log::info!("[send] link restored");
                state.relink_attempts = 0;
                let resumed = match state.mode_before_suspend {
                    SendMode::NotSet | SendMode::Suspend => SendMode::Direct,
                    previous => previous,
                };
                self.set_mode(state, resumed);
                state.mode_before_suspend = SendMode::NotSet;
            }
            RelinkStatus::Pending => {
                log::debug!("[send] relink pending (attempt {})", state.relink_attempts);
            }
            RelinkStatus::Failed => {
                log::warn!("[send] relink failed, terminating");
                self.clear_locked(state, SendMode::Terminated);
            }
        }
    }

    fn clear_locked(&self, state: &mut StrategyState, new_mode: SendMode) {
        if state.header.length > 0 && !state.pkt_chain.is_empty() {
            let left = state.pkt_chain.total_len();
            self.adjust_packet_after_send(state, left);
        }
        Self::drop_pending(state);
        state.header.length = 0;
        state.pkt_chain = ByteChain::new();
        state.header_complete = false;
        state.start_counter = 0;
        self.set_mode(state, new_mode);
        state.mode_before_suspend = SendMode::NotSet;
    }

    /// Move packet elements and backlog to the notification list as drops.
    fn drop_pending(state: &mut StrategyState) {
        let elems = state.elems.take();
        let queue = state.queue.take();
        for element in elems.iter().chain(queue.iter()) {
            state.delayed.push((Arc::clone(element), SendMode::Terminated));
        }
    }

    fn work_available(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.work_available();
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Deliver collected completions (only those matching `criteria`, when
    /// given). Returns true if any were delivered.
    ///
    /// Elements completed while terminated are reported dropped by the
    /// transport; all others delivered.
    pub fn send_delayed_notifications(&self, criteria: Option<&dyn MatchCriteria>) -> bool {
        let ready: Vec<(ElementRef, SendMode)> = {
            let mut state = self.state.lock();
            if state.delayed.is_empty() {
                return false;
            }
            let pending = std::mem::take(&mut state.delayed);
            match criteria {
                None => pending,
                Some(criteria) => {
                    let (hit, keep): (Vec<_>, Vec<_>) =
                        pending.into_iter().partition(|(e, _)| criteria.matches(e));
                    state.delayed = keep;
                    hit
                }
            }
        };
        if ready.is_empty() {
            return false;
        }
        for (element, mode) in ready {
            if mode == SendMode::Terminated {
                element.data_dropped(true);
            } else {
                element.data_delivered();
            }
        }
        true
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Withdraw the element carrying `sample`'s payload.
    ///
    /// Returns `Released` if it had already been sent and only awaited its
    /// notification. An element whose bytes are part of a partially sent
    /// packet is swapped for a private copy so the packet stays intact.
    pub fn remove_sample(&self, sample: &QueueElement) -> RemoveResult {
        let criteria = MatchOnDataPayload::new(sample);
        if self.send_delayed_notifications(Some(&criteria)) {
            return RemoveResult::Released;
        }
        let mut state = self.state.lock();
        self.do_remove_sample(&mut state, &criteria, false)
    }

    /// Withdraw everything of `publication_id`, detaching its retained
    /// packets in the send buffer.
    pub fn remove_all_msgs(&self, publication_id: GUID) {
        let criteria = MatchOnPubId::new(publication_id);
        self.send_delayed_notifications(Some(&criteria));
        let mut state = self.state.lock();
        if let Some(buffer) = &self.send_buffer {
            buffer.retain_all(publication_id);
        }
        self.do_remove_sample(&mut state, &criteria, true);
    }

    /// Withdraw `element` if still pending, then report it delivered
    /// unless the withdrawal already released it.
    pub fn deliver_ack_request(&self, element: ElementRef) {
        let criteria = MatchOnElement::new(Arc::clone(&element));
        let removed = {
            let mut state = self.state.lock();
            self.do_remove_sample(&mut state, &criteria, false)
        };
        if removed != RemoveResult::Released {
            element.data_delivered();
        }
    }

    fn do_remove_sample(
        &self,
        state: &mut StrategyState,
        criteria: &dyn MatchCriteria,
        remove_all: bool,
    ) -> RemoveResult {
        if state.mode == SendMode::Direct || (state.pkt_chain.is_empty() && state.queue.is_empty()) {
            let mut visitor = QueueRemoveVisitor::new(criteria);
            state.elems.accept_remove_visitor(&mut visitor);
            let status = visitor.status();
            if status.is_removed() {
                state.header.length = state
                    .header
                    .length
                    .saturating_sub(visitor.removed_bytes() as u32);
            }
            if criteria.unique() || !remove_all {
                return status;
            }
        }

        let mut visitor = QueueRemoveVisitor::new(criteria);
        state.queue.accept_remove_visitor(&mut visitor);
        let queue_status = visitor.status();
        if queue_status.is_removed() && (criteria.unique() || !remove_all) {
            return queue_status;
        }
        if state.pkt_chain.is_empty() {
            return queue_status;
        }

        let header_in_chain = !state.header_complete;
        let mut visitor = PacketRemoveVisitor::new(criteria, &mut state.pkt_chain, header_in_chain);
        state.elems.accept_replace_visitor(&mut visitor);
        match visitor.status() {
            RemoveResult::Error => {
                log::error!("[send] packet and element queue out of sync during removal");
                RemoveResult::Error
            }
            RemoveResult::NotFound => queue_status,
            status => status,
        }
    }

    // ========================================================================
    // Resend
    // ========================================================================

    /// Resend buffered packets in `range` to `destination` (unknown = all).
    ///
    /// Sequences no longer available are added to `gaps`. Returns whether
    /// the whole range could be resent.
    pub fn resend_packets(
        &self,
        range: SequenceRange,
        gaps: Option<&mut DisjointSequence>,
        destination: GUID,
    ) -> bool {
        let _state = self.state.lock();
        match &self.send_buffer {
            Some(buffer) => buffer.resend(range, gaps, destination, &*self.link),
            None => {
                if let Some(gaps) = gaps {
                    if let Err(e) = gaps.insert_range(range) {
                        log::debug!("[send] cannot score resend range {}: {}", range, e);
                    }
                }
                false
            }
        }
    }
}

impl SynchWorker for SendStrategy {
    fn perform_work(&self) -> WorkOutcome {
        SendStrategy::perform_work(self)
    }
}

impl Drop for SendStrategy {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.get_mut().take() {
            worker.stop();
        }
    }
}

impl std::fmt::Debug for SendStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SendStrategy")
            .field("mode", &state.mode)
            .field("packet_elements", &state.elems.len())
            .field("packet_length", &state.header.length)
            .field("queued", &state.queue.len())
            .finish()
    }
}
