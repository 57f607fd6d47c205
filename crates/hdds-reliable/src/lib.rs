// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-reliable - reliable send path for DDS transports
//!
//! Sequence tracking, packet assembly, retention and resend for a
//! connection-oriented or datagram DDS transport.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                  Writers / control messages                         |
//! |          QueueElement (sample, control, fragment, copy)             |
//! +---------------------------------------------------------------------+
//! |                         SendStrategy                                |
//! |   packet assembly | fragmentation | Direct/Queue/Suspend/Terminated |
//! +----------------------------------+----------------------------------+
//! |            SendBuffer            |          TransportLink           |
//! |   retained packets, NACK resend  |   UDP socket, mock, custom       |
//! +----------------------------------+----------------------------------+
//! |      DisjointSequence / OrderedRanges (gaps, acks, bitmaps)         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DisjointSequence`] | Received/acknowledged sequence set with RTPS bitmap encoding |
//! | [`transport::QueueElement`] | Unit of outbound data with loan-counted completion |
//! | [`transport::SendStrategy`] | Packet assembler and backpressure state machine |
//! | [`transport::SendBuffer`] | Sent packets retained for resend |
//! | [`transport::TransportReassembly`] | Receive-side fragment reassembly |
//! | [`TransportConfig`] | Packet, retention and worker limits |
//!
//! ## Example
//!
//! ```
//! use hdds_reliable::{DisjointSequence, SequenceNumber, SequenceRange};
//!
//! let mut received = DisjointSequence::new();
//! received.insert(SequenceNumber::new(1));
//! received.insert(SequenceNumber::new(5));
//!
//! assert!(received.disjoint());
//! assert_eq!(received.missing_sequence_ranges(), vec![SequenceRange::new(2, 4)]);
//! ```

pub mod config;
pub mod error;
pub mod guid;
pub mod sequence;
pub mod transport;

pub use config::{TransportConfig, TransportDebug};
pub use error::{Error, Result};
pub use guid::GUID;
pub use sequence::{
    BitmapResult, DisjointSequence, OrderedRanges, SequenceNumber, SequenceRange,
};
