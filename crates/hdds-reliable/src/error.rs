// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type for the reliable transport layer.

use crate::sequence::SequenceNumber;

/// Errors reported by sequence tracking, packet assembly and the send buffer.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Sequence Errors
    // ========================================================================
    /// Range with `first > second`.
    InvalidRange {
        first: SequenceNumber,
        second: SequenceNumber,
    },
    /// Range spanning more than half of the positive sequence space.
    RangeTooWide {
        first: SequenceNumber,
        second: SequenceNumber,
    },

    // ========================================================================
    // Packet Errors
    // ========================================================================
    /// Element cannot fit in a packet and fragmentation is disabled.
    PacketTooLarge { size: usize, max: usize },
    /// Fragment size too small to carry a sample header and payload.
    FragmentationFailed(String),
    /// Packet chain and element queue disagree about block layout.
    ChainOutOfSync(String),
    /// Wire data could not be decoded.
    Malformed(String),

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Strategy has been terminated.
    Terminated,
    /// Invalid state for the requested operation.
    InvalidState(String),
    /// Configuration rejected by `validate()`.
    Config(&'static str),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Send operation failed.
    SendFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidRange { first, second } => {
                write!(f, "Invalid sequence range: {} > {}", first, second)
            }
            Error::RangeTooWide { first, second } => {
                write!(f, "Sequence range too wide: {}-{}", first, second)
            }
            Error::PacketTooLarge { size, max } => {
                write!(f, "Element of {} bytes exceeds packet limit {}", size, max)
            }
            Error::FragmentationFailed(msg) => write!(f, "Fragmentation failed: {}", msg),
            Error::ChainOutOfSync(msg) => write!(f, "Packet chain out of sync: {}", msg),
            Error::Malformed(msg) => write!(f, "Malformed packet: {}", msg),
            Error::Terminated => write!(f, "Send strategy terminated"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_range() {
        let e = Error::InvalidRange {
            first: SequenceNumber::new(50),
            second: SequenceNumber::new(40),
        };
        assert_eq!(e.to_string(), "Invalid sequence range: 50 > 40");
    }

    #[test]
    fn test_io_source() {
        use std::error::Error as _;
        let e = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
        assert!(Error::Terminated.source().is_none());
    }
}
