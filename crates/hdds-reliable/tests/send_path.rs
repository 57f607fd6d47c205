// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::wildcard_imports)] // Test utility imports

//! End-to-end send path: strategy -> link -> parse -> reassembly, and
//! NACK-driven resend from the send buffer.

use std::io::{self, IoSlice};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use hdds_reliable::transport::*;
use hdds_reliable::{DisjointSequence, SequenceNumber, SequenceRange, TransportConfig, GUID};

// ============================================================================
// Helpers
// ============================================================================

/// Link keeping every datagram it accepts.
#[derive(Default)]
struct CaptureLink {
    datagrams: Mutex<Vec<Vec<u8>>>,
}

impl CaptureLink {
    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.datagrams.lock())
    }
}

impl TransportLink for CaptureLink {
    fn send_bytes(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let datagram: Vec<u8> = bufs.iter().flat_map(|b| b.iter().copied()).collect();
        let n = datagram.len();
        self.datagrams.lock().push(datagram);
        Ok(n)
    }
}

#[derive(Default)]
struct Completions {
    delivered: Mutex<Vec<SequenceNumber>>,
    dropped: Mutex<Vec<SequenceNumber>>,
}

impl SendListener for Completions {
    fn data_delivered(&self, element: &QueueElement) {
        self.delivered.lock().push(element.sequence());
    }

    fn data_dropped(&self, element: &QueueElement, _dropped_by_transport: bool) {
        self.dropped.lock().push(element.sequence());
    }
}

fn sample(listener: &Arc<Completions>, seq: i64, payload: Vec<u8>) -> ElementRef {
    let l: Arc<dyn SendListener> = listener.clone();
    QueueElement::sample(
        GUID::from_parts(7, 0x102),
        SequenceNumber::new(seq),
        Bytes::from(payload),
        Some(l),
    )
    .into_ref()
}

fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..len).map(|_| rng.u8(..)).collect()
}

fn no_worker() -> TransportConfig {
    TransportConfig::default().with_thread_per_connection(false)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_fragmented_samples_reassemble() {
    let link = Arc::new(CaptureLink::default());
    let config = no_worker().with_max_message_size(300);
    let strategy = SendStrategy::new(config.clone(), link.clone()).unwrap();
    let listener = Arc::new(Completions::default());

    let payloads: Vec<Vec<u8>> = (0..4).map(|i| payload(100 + i * 350, i as u64)).collect();
    strategy.send_start();
    for (i, p) in payloads.iter().enumerate() {
        strategy.send(sample(&listener, i as i64 + 1, p.clone()), true);
    }
    strategy.send_stop();

    let reassembly = TransportReassembly::from_config(&config);
    let mut received = Vec::new();
    let mut last_packet_seq = 0;
    for datagram in link.take() {
        assert!(datagram.len() <= 300, "datagram of {} bytes", datagram.len());
        let (header, samples) = parse_packet(Bytes::from(datagram)).unwrap();
        assert!(header.sequence.value() > last_packet_seq);
        last_packet_seq = header.sequence.value();
        received.extend(samples.into_iter().filter_map(|s| reassembly.accept(s)));
    }

    assert_eq!(received.len(), payloads.len());
    for (got, want) in received.iter().zip(&payloads) {
        assert_eq!(&got.payload[..], &want[..]);
    }
    assert_eq!(listener.delivered.lock().len(), payloads.len());
    assert!(listener.dropped.lock().is_empty());
    assert_eq!(reassembly.fragments_size(), 0);
}

#[test]
fn test_nack_resend_from_buffer() {
    let link = Arc::new(CaptureLink::default());
    let config = no_worker()
        .with_max_samples_per_packet(1)
        .with_send_buffer_capacity(4);
    let buffer = Arc::new(SendBuffer::from_config(&config));
    let strategy = SendStrategy::new(config, link.clone())
        .unwrap()
        .with_send_buffer(Arc::clone(&buffer));
    let listener = Arc::new(Completions::default());

    for seq in 1..=6 {
        strategy.send(sample(&listener, seq, payload(32, seq as u64)), true);
    }
    let original = link.take();
    assert_eq!(original.len(), 6);
    assert_eq!(buffer.len(), 4);
    assert_eq!(buffer.low(), Some(SequenceNumber::new(3)));

    // Receiver lost packets 2 and 5.
    let mut gaps = DisjointSequence::new();
    let whole = strategy.resend_packets(SequenceRange::new(2, 2), Some(&mut gaps), GUID::unknown());
    assert!(!whole);
    assert!(gaps.contains(SequenceNumber::new(2)));

    let whole = strategy.resend_packets(SequenceRange::new(5, 5), Some(&mut gaps), GUID::unknown());
    assert!(whole);
    let resent = link.take();
    assert_eq!(resent, vec![original[4].clone()]);

    // Acknowledged packets leave the buffer.
    buffer.release_acked(SequenceNumber::new(3));
    assert!(!buffer.contains(SequenceNumber::new(3)));
    assert_eq!(strategy.metrics().snapshot().packets_sent, 6);
}

#[test]
fn test_removed_sample_keeps_resend_copy() {
    let link = Arc::new(CaptureLink::default());
    let config = no_worker().with_max_samples_per_packet(1);
    let buffer = Arc::new(SendBuffer::from_config(&config));
    let strategy = SendStrategy::new(config, link.clone())
        .unwrap()
        .with_send_buffer(Arc::clone(&buffer));
    let listener = Arc::new(Completions::default());

    strategy.send(sample(&listener, 1, b"retained".to_vec()), true);
    let original = link.take();

    // The writer withdraws the publication; the buffer detaches from its storage.
    strategy.remove_all_msgs(GUID::from_parts(7, 0x102));
    assert!(strategy.resend_packets(SequenceRange::new(1, 1), None, GUID::unknown()));
    assert_eq!(link.take(), original);
}

#[test]
fn test_udp_loopback() {
    let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
    rx.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let link_config = UdpLinkConfig::new(rx.local_addr().unwrap())
        .with_bind_addr("127.0.0.1:0".parse().unwrap());
    let link = Arc::new(UdpLink::new(link_config).unwrap());

    let config = TransportConfig::default().with_max_message_size(1400);
    let strategy = Arc::new(SendStrategy::new(config, link).unwrap());
    strategy.start().unwrap();
    let listener = Arc::new(Completions::default());

    let big = payload(3000, 42);
    strategy.send_start();
    strategy.send(sample(&listener, 1, big.clone()), true);
    strategy.send(sample(&listener, 2, b"small".to_vec()), true);
    strategy.send_stop();

    let reassembly = TransportReassembly::new(Duration::from_secs(5));
    let mut received = Vec::new();
    let mut buf = vec![0u8; 2048];
    while received.len() < 2 {
        let n = rx.recv(&mut buf).unwrap();
        let (_, samples) = parse_packet(Bytes::copy_from_slice(&buf[..n])).unwrap();
        received.extend(samples.into_iter().filter_map(|s| reassembly.accept(s)));
    }
    assert_eq!(&received[0].payload[..], &big[..]);
    assert_eq!(&received[1].payload[..], b"small");
    strategy.stop();
    assert_eq!(listener.delivered.lock().len(), 2);
}
