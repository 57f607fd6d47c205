// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable transport configuration.
//!
//! - [`TransportConfig`] - packet assembly, fragmentation and retention limits
//! - [`TransportDebug`] - per-instance switches for verbose logging
//!
//! # Example
//!
//! ```
//! use hdds_reliable::TransportConfig;
//!
//! let config = TransportConfig::default()
//!     .with_max_message_size(1400)
//!     .with_send_buffer_capacity(64);
//! assert!(config.validate().is_ok());
//! assert!(config.fragmentation_enabled());
//! ```

use std::time::Duration;

/// Default maximum number of samples coalesced into one packet.
pub const DEFAULT_MAX_SAMPLES_PER_PACKET: usize = 10;

/// Default size at which a packet is flushed without waiting for more samples.
pub const DEFAULT_OPTIMUM_PACKET_SIZE: usize = 4096;

/// Default hard upper bound on a packet (header included).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2_147_481_599;

/// Default number of packets retained for resend.
pub const DEFAULT_SEND_BUFFER_CAPACITY: usize = 32;

/// Send buffer capacity meaning "never evict".
pub const UNLIMITED_CAPACITY: usize = 0;

/// Upper bound on the number of byte blocks handed to one vectored send.
pub const MAX_SEND_BLOCKS: usize = 50;

/// Verbose logging switches owned by one transport instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportDebug {
    /// Log every packet prepared, sent and adjusted
    pub log_send_details: bool,
    /// Log elements dropped or rejected by the send path
    pub log_dropped_messages: bool,
    /// Log fragment storage and reassembly decisions
    pub log_fragment_storage: bool,
    /// Log send buffer insert/evict/resend counts
    pub log_remote_counts: bool,
}

impl TransportDebug {
    /// Everything on.
    pub fn verbose() -> Self {
        Self {
            log_send_details: true,
            log_dropped_messages: true,
            log_fragment_storage: true,
            log_remote_counts: true,
        }
    }
}

/// Reliable transport configuration.
///
/// Controls how samples are coalesced into packets, when they are
/// fragmented, how many sent packets are retained for resend and how the
/// background worker reacts to a clogged or lost link.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    // === Packet assembly ===
    /// Maximum samples coalesced into one packet
    pub max_samples_per_packet: usize,

    /// Flush a packet as soon as it reaches this many bytes
    pub optimum_packet_size: usize,

    /// Hard packet size limit, header included
    pub max_packet_size: usize,

    /// Largest datagram the link accepts (0 = no fragmentation)
    pub max_message_size: usize,

    // === Retention ===
    /// Packets retained for resend (0 = unlimited)
    pub send_buffer_capacity: usize,

    // === Worker ===
    /// Drive queued work from a dedicated thread per strategy
    pub thread_per_connection: bool,

    /// Delay before retrying a clogged link
    pub clogged_retry_delay: Duration,

    /// Maximum relink attempts before terminating (0 = infinite)
    pub max_reconnect_attempts: u32,

    // === Reassembly ===
    /// Partially received samples are discarded after this long
    pub reassembly_timeout: Duration,

    // === Diagnostics ===
    /// Verbose logging switches
    pub debug: TransportDebug,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_samples_per_packet: DEFAULT_MAX_SAMPLES_PER_PACKET,
            optimum_packet_size: DEFAULT_OPTIMUM_PACKET_SIZE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_message_size: 0, // No fragmentation

            send_buffer_capacity: DEFAULT_SEND_BUFFER_CAPACITY,

            thread_per_connection: true,
            clogged_retry_delay: Duration::from_millis(10),
            max_reconnect_attempts: 3,

            reassembly_timeout: Duration::from_secs(30),

            debug: TransportDebug::default(),
        }
    }
}

impl TransportConfig {
    /// Builder: set max samples per packet
    pub fn with_max_samples_per_packet(mut self, n: usize) -> Self {
        self.max_samples_per_packet = n;
        self
    }

    /// Builder: set optimum packet size
    pub fn with_optimum_packet_size(mut self, size: usize) -> Self {
        self.optimum_packet_size = size;
        self
    }

    /// Builder: set max packet size
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Builder: set max message size (enables fragmentation when > 0)
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Builder: set send buffer capacity
    pub fn with_send_buffer_capacity(mut self, capacity: usize) -> Self {
        self.send_buffer_capacity = capacity;
        self
    }

    /// Builder: enable or disable the per-connection worker thread
    pub fn with_thread_per_connection(mut self, enabled: bool) -> Self {
        self.thread_per_connection = enabled;
        self
    }

    /// Builder: set clogged retry delay
    pub fn with_clogged_retry_delay(mut self, delay: Duration) -> Self {
        self.clogged_retry_delay = delay;
        self
    }

    /// Builder: set max relink attempts
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Builder: set reassembly timeout
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Builder: set debug switches
    pub fn with_debug(mut self, debug: TransportDebug) -> Self {
        self.debug = debug;
        self
    }

    /// Whether elements larger than the available space are split.
    pub fn fragmentation_enabled(&self) -> bool {
        self.max_message_size > 0
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_samples_per_packet == 0 {
            return Err("max_samples_per_packet must be > 0");
        }
        if self.optimum_packet_size == 0 {
            return Err("optimum_packet_size must be > 0");
        }
        if self.max_packet_size <= crate::transport::header::PacketHeader::SIZE {
            return Err("max_packet_size must exceed the packet header");
        }
        if self.fragmentation_enabled() {
            let min = crate::transport::header::PacketHeader::SIZE
                + crate::transport::header::SampleHeader::SIZE
                + crate::transport::send_strategy::MIN_FRAGMENT_SIZE;
            if self.max_message_size < min {
                return Err("max_message_size too small to carry a fragment");
            }
        }
        if self.clogged_retry_delay.is_zero() {
            return Err("clogged_retry_delay must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_samples_per_packet, 10);
        assert_eq!(config.optimum_packet_size, 4096);
        assert_eq!(config.max_packet_size, 2147481599);
        assert!(!config.fragmentation_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = TransportConfig::default()
            .with_max_samples_per_packet(3)
            .with_max_message_size(512)
            .with_send_buffer_capacity(UNLIMITED_CAPACITY)
            .with_debug(TransportDebug::verbose());
        assert_eq!(config.max_samples_per_packet, 3);
        assert!(config.fragmentation_enabled());
        assert_eq!(config.send_buffer_capacity, 0);
        assert!(config.debug.log_send_details);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(TransportConfig::default()
            .with_max_samples_per_packet(0)
            .validate()
            .is_err());
        assert!(TransportConfig::default()
            .with_max_message_size(40)
            .validate()
            .is_err());
        assert!(TransportConfig::default()
            .with_max_packet_size(16)
            .validate()
            .is_err());
    }
}
