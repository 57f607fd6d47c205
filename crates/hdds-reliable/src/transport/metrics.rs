// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send path metrics.
//!
//! Counters kept by one send strategy and its send buffer:
//! - Packet and byte throughput (including partial sends)
//! - Link trouble (backpressure, peer lost, send errors, relinks)
//! - Element fate (queued, dropped, fragments created)
//! - Retention (packets buffered, evicted, resent, gaps reported)
//!
//! # Example
//!
//! ```
//! use hdds_reliable::transport::SendMetrics;
//!
//! let metrics = SendMetrics::new();
//! metrics.record_packet_sent(1024);
//! metrics.record_backpressure();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.packets_sent, 1);
//! assert_eq!(snapshot.backpressure_events, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one send strategy.
#[derive(Debug)]
pub struct SendMetrics {
    // Throughput
    /// Packets fully written to the link
    packets_sent: AtomicU64,

    /// Bytes written to the link (headers included)
    bytes_sent: AtomicU64,

    /// Writes that accepted only part of a packet
    partial_sends: AtomicU64,

    // Link trouble
    /// Writes refused with WouldBlock/ENOBUFS
    backpressure_events: AtomicU64,

    /// Writes that found the peer gone
    peer_lost: AtomicU64,

    /// Writes that failed outright
    send_errors: AtomicU64,

    /// Relink attempts
    relinks: AtomicU64,

    /// Mode transitions
    mode_changes: AtomicU64,

    // Elements
    /// Elements parked in the backlog queue
    elements_queued: AtomicU64,

    /// Elements dropped by the transport
    elements_dropped: AtomicU64,

    /// Fragments produced by splitting elements
    fragments_created: AtomicU64,

    // Retention
    /// Packets stored in the send buffer
    packets_retained: AtomicU64,

    /// Packets evicted from a full send buffer
    packets_evicted: AtomicU64,

    /// Packets resent on request
    packets_resent: AtomicU64,

    /// Requested sequences no longer available
    resend_gaps: AtomicU64,

    /// When metrics collection started
    start_time: Instant,
}

impl SendMetrics {
    pub fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            partial_sends: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
            peer_lost: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            relinks: AtomicU64::new(0),
            mode_changes: AtomicU64::new(0),
            elements_queued: AtomicU64::new(0),
            elements_dropped: AtomicU64::new(0),
            fragments_created: AtomicU64::new(0),
            packets_retained: AtomicU64::new(0),
            packets_evicted: AtomicU64::new(0),
            packets_resent: AtomicU64::new(0),
            resend_gaps: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    // ========================================================================
    // Throughput
    // ========================================================================

    /// Record a packet completely written.
    pub fn record_packet_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a write that left part of the packet pending.
    pub fn record_partial_send(&self, bytes: usize) {
        self.partial_sends.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // ========================================================================
    // Link trouble
    // ========================================================================

    pub fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peer_lost(&self) {
        self.peer_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relink(&self) {
        self.relinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mode_change(&self) {
        self.mode_changes.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Elements
    // ========================================================================

    pub fn record_element_queued(&self) {
        self.elements_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_element_dropped(&self) {
        self.elements_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragments(&self, count: usize) {
        self.fragments_created.fetch_add(count as u64, Ordering::Relaxed);
    }

    // ========================================================================
    // Retention
    // ========================================================================

    pub fn record_packet_retained(&self) {
        self.packets_retained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_evicted(&self) {
        self.packets_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_resent(&self) {
        self.packets_resent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resend_gap(&self) {
        self.resend_gaps.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get uptime (time since metrics collection started).
    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> SendMetricsSnapshot {
        SendMetricsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            partial_sends: self.partial_sends.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            peer_lost: self.peer_lost.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            relinks: self.relinks.load(Ordering::Relaxed),
            mode_changes: self.mode_changes.load(Ordering::Relaxed),
            elements_queued: self.elements_queued.load(Ordering::Relaxed),
            elements_dropped: self.elements_dropped.load(Ordering::Relaxed),
            fragments_created: self.fragments_created.load(Ordering::Relaxed),
            packets_retained: self.packets_retained.load(Ordering::Relaxed),
            packets_evicted: self.packets_evicted.load(Ordering::Relaxed),
            packets_resent: self.packets_resent.load(Ordering::Relaxed),
            resend_gaps: self.resend_gaps.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.packets_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.partial_sends.store(0, Ordering::Relaxed);
        self.backpressure_events.store(0, Ordering::Relaxed);
        self.peer_lost.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
        self.relinks.store(0, Ordering::Relaxed);
        self.mode_changes.store(0, Ordering::Relaxed);
        self.elements_queued.store(0, Ordering::Relaxed);
        self.elements_dropped.store(0, Ordering::Relaxed);
        self.fragments_created.store(0, Ordering::Relaxed);
        self.packets_retained.store(0, Ordering::Relaxed);
        self.packets_evicted.store(0, Ordering::Relaxed);
        self.packets_resent.store(0, Ordering::Relaxed);
        self.resend_gaps.store(0, Ordering::Relaxed);
    }
}

impl Default for SendMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of send path metrics.
#[derive(Clone, Debug, Default)]
pub struct SendMetricsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub partial_sends: u64,
    pub backpressure_events: u64,
    pub peer_lost: u64,
    pub send_errors: u64,
    pub relinks: u64,
    pub mode_changes: u64,
    pub elements_queued: u64,
    pub elements_dropped: u64,
    pub fragments_created: u64,
    pub packets_retained: u64,
    pub packets_evicted: u64,
    pub packets_resent: u64,
    pub resend_gaps: u64,
    /// Uptime in seconds
    pub uptime_secs: f64,
}

impl SendMetricsSnapshot {
    /// Bytes per second since collection started.
    pub fn byte_rate(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            self.bytes_sent as f64 / self.uptime_secs
        } else {
            0.0
        }
    }

    /// Share of write attempts that hit backpressure.
    pub fn backpressure_ratio(&self) -> f64 {
        let attempts = self.packets_sent + self.partial_sends + self.backpressure_events;
        if attempts == 0 {
            0.0
        } else {
            self.backpressure_events as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = SendMetrics::new();
        metrics.record_packet_sent(100);
        metrics.record_partial_send(40);
        metrics.record_backpressure();
        metrics.record_fragments(2);
        let snap = metrics.snapshot();
        assert_eq!(snap.packets_sent, 1);
        assert_eq!(snap.bytes_sent, 140);
        assert_eq!(snap.partial_sends, 1);
        assert_eq!(snap.fragments_created, 2);
        assert!((snap.backpressure_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let metrics = SendMetrics::default();
        metrics.record_packet_resent();
        metrics.record_resend_gap();
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.packets_resent, 0);
        assert_eq!(snap.resend_gaps, 0);
    }
}
