// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable send path: packet assembly, retention and resend.
//!
//! Samples enter as [`QueueElement`]s, are coalesced (or fragmented) into
//! packets by a [`SendStrategy`] and written to a [`TransportLink`]. Each
//! packet written is retained in a [`SendBuffer`] until acknowledged, so a
//! NACK can be answered by resending it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use hdds_reliable::transport::{QueueElement, SendBuffer, SendStrategy, UdpLink, UdpLinkConfig};
//! use hdds_reliable::{SequenceNumber, TransportConfig, GUID};
//!
//! let link = Arc::new(UdpLink::new(UdpLinkConfig::new("127.0.0.1:7410".parse().unwrap())).unwrap());
//! let config = TransportConfig::default().with_max_message_size(1400);
//! let buffer = Arc::new(SendBuffer::from_config(&config));
//! let strategy = Arc::new(SendStrategy::new(config, link).unwrap().with_send_buffer(buffer));
//! strategy.start().unwrap();
//!
//! let sample = QueueElement::sample(GUID::from_parts(1, 0x102), SequenceNumber::new(1), Bytes::from_static(b"hello"), None);
//! strategy.send_start();
//! strategy.send(sample.into_ref(), true);
//! strategy.send_stop();
//! ```

/// Shared byte-block chains.
pub mod chain;
/// Queue elements, loans and match criteria.
pub mod element;
/// Packet and sample wire headers.
pub mod header;
/// Link abstraction under the send strategy.
pub mod link;
/// Send path counters.
pub mod metrics;
/// Removal from assembled packets.
pub mod packet_remove;
/// Element queue and visitors.
pub mod queue;
/// Receive-side fragment reassembly.
pub mod reassembly;
/// Retention of sent packets for resend.
pub mod send_buffer;
/// Packet assembler and backpressure state machine.
pub mod send_strategy;
/// Thread-per-connection worker.
pub mod thread_synch;
/// UDP datagram link.
pub mod udp_link;

pub use chain::ByteChain;
pub use element::{
    ElementKind, ElementRef, MatchCriteria, MatchOnDataPayload, MatchOnElement, MatchOnPubId,
    QueueElement, RemoveResult, SendListener,
};
pub use header::{parse_packet, MessageId, PacketHeader, ReceivedSample, SampleHeader};
pub use link::{send_chain, RelinkStatus, TransportLink};
pub use metrics::{SendMetrics, SendMetricsSnapshot};
pub use packet_remove::PacketRemoveVisitor;
pub use queue::{
    BuildChainVisitor, CopyChainVisitor, ElementQueue, QueueRemoveVisitor, QueueVisitor,
    RemoveAllVisitor, RemoveVisitor, ReplaceVisitor, Visit,
};
pub use reassembly::{FragKey, FragmentRange, TransportReassembly};
pub use send_buffer::{RetainedPacket, SendBuffer};
pub use send_strategy::{SendMode, SendPacketOutcome, SendStrategy, MIN_FRAGMENT_SIZE};
pub use thread_synch::{SynchWorker, ThreadSynch, WorkNotifier, WorkOutcome};
pub use udp_link::{UdpLink, UdpLinkConfig};
