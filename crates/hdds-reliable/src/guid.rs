// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint identity used to tag queued samples with their publication and
//! destination subscription.

use std::fmt;

/// RTPS GUID: 12-byte participant prefix plus 4-byte entity id.
///
/// Display format is dotted hex: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GUID {
    pub prefix: [u8; 12],
    pub entity_id: [u8; 4],
}

impl GUID {
    /// Size on the wire.
    pub const SIZE: usize = 16;

    /// Create GUID from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self { prefix, entity_id }
    }

    /// Create GUID from separate prefix and entity ID
    pub fn new(prefix: [u8; 12], entity_id: [u8; 4]) -> Self {
        Self { prefix, entity_id }
    }

    /// Shorthand for tests and tools: prefix filled with `participant`,
    /// entity id carrying `entity` big-endian.
    pub fn from_parts(participant: u8, entity: u32) -> Self {
        Self {
            prefix: [participant; 12],
            entity_id: entity.to_be_bytes(),
        }
    }

    /// Convert GUID to 16-byte array
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// GUID_UNKNOWN (all zeros)
    pub fn unknown() -> Self {
        Self {
            prefix: [0; 12],
            entity_id: [0; 4],
        }
    }

    /// Check if GUID is GUID_UNKNOWN
    pub fn is_unknown(&self) -> bool {
        self.prefix == [0; 12] && self.entity_id == [0; 4]
    }
}

impl Default for GUID {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip_and_display() {
        let bytes = [1, 15, 172, 16, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 193];
        let guid = GUID::from_bytes(bytes);
        assert_eq!(guid.as_bytes(), bytes);
        assert_eq!(
            guid.to_string(),
            "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
        );
    }

    #[test]
    fn test_unknown() {
        assert!(GUID::default().is_unknown());
        assert!(!GUID::from_parts(1, 2).is_unknown());
    }
}
