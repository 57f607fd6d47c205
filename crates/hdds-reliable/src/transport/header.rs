// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet and sample headers.
//!
//! ```text
//! Packet (32 bytes, big-endian)
//! +-------+-----+-------+----------+--------+----------+-------------+
//! | HDSP  | ver | flags | reserved | length | sequence | source (12) |
//! |  4    |  1  |   1   |    2     |   4    |    8     |     12      |
//! +-------+-----+-------+----------+--------+----------+-------------+
//!
//! Sample (36 bytes, big-endian), followed by `message_length` bytes
//! +----+-------+----------+---------+----------+-----------+-----------+
//! | id | flags | reserved | msg len | sequence | pub GUID  | frag num  |
//! | 1  |   1   |    2     |    4    |    8     |    16     |     4     |
//! +----+-------+----------+---------+----------+-----------+-----------+
//! ```
//!
//! `length` counts every byte after the packet header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::sequence::SequenceNumber;

/// Packet magic.
pub const PACKET_MAGIC: [u8; 4] = *b"HDSP";

/// Current wire version.
pub const PACKET_VERSION: u8 = 1;

/// Header preceding every packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet starts a fragmented sample
    pub first_fragment: bool,
    /// Packet ends a fragmented sample
    pub last_fragment: bool,
    /// Bytes following the header
    pub length: u32,
    /// Per-link packet sequence
    pub sequence: SequenceNumber,
    /// Sending participant
    pub source: [u8; 12],
}

impl PacketHeader {
    pub const SIZE: usize = 32;

    const FLAG_FIRST_FRAGMENT: u8 = 0x01;
    const FLAG_LAST_FRAGMENT: u8 = 0x02;

    pub fn new(source: [u8; 12]) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.first_fragment {
            flags |= Self::FLAG_FIRST_FRAGMENT;
        }
        if self.last_fragment {
            flags |= Self::FLAG_LAST_FRAGMENT;
        }
        flags
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_slice(&PACKET_MAGIC);
        buf.put_u8(PACKET_VERSION);
        buf.put_u8(self.flags());
        buf.put_u16(0);
        buf.put_u32(self.length);
        buf.put_i64(self.sequence.value());
        buf.put_slice(&self.source);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::Malformed(format!(
                "packet header needs {} bytes, have {}",
                Self::SIZE,
                buf.remaining()
            )));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != PACKET_MAGIC {
            return Err(Error::Malformed("bad packet magic".into()));
        }
        let version = buf.get_u8();
        if version != PACKET_VERSION {
            return Err(Error::Malformed(format!("unsupported version {}", version)));
        }
        let flags = buf.get_u8();
        buf.advance(2);
        let length = buf.get_u32();
        let sequence = SequenceNumber::new(buf.get_i64());
        let mut source = [0u8; 12];
        buf.copy_to_slice(&mut source);
        Ok(Self {
            first_fragment: flags & Self::FLAG_FIRST_FRAGMENT != 0,
            last_fragment: flags & Self::FLAG_LAST_FRAGMENT != 0,
            length,
            sequence,
            source,
        })
    }
}

/// Kind of message carried by a sample header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageId {
    #[default]
    SampleData,
    Control,
}

impl MessageId {
    fn to_wire(self) -> u8 {
        match self {
            MessageId::SampleData => 1,
            MessageId::Control => 2,
        }
    }

    fn from_wire(v: u8) -> Result<Self> {
        match v {
            1 => Ok(MessageId::SampleData),
            2 => Ok(MessageId::Control),
            other => Err(Error::Malformed(format!("unknown message id {}", other))),
        }
    }
}

/// Header preceding every sample (or sample fragment) in a packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleHeader {
    pub message_id: MessageId,
    /// Sample is a fragment of a larger sample
    pub fragment: bool,
    /// More fragments of this sample follow
    pub more_fragments: bool,
    /// Payload bytes following this header
    pub message_length: u32,
    /// Writer sample sequence
    pub sequence: SequenceNumber,
    pub publication_id: GUID,
    /// 1-based fragment number (0 when not fragmented)
    pub fragment_number: u32,
}

impl SampleHeader {
    pub const SIZE: usize = 36;

    const FLAG_FRAGMENT: u8 = 0x01;
    const FLAG_MORE_FRAGMENTS: u8 = 0x02;

    pub fn new(message_id: MessageId, publication_id: GUID, sequence: SequenceNumber) -> Self {
        Self {
            message_id,
            publication_id,
            sequence,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut flags = 0;
        if self.fragment {
            flags |= Self::FLAG_FRAGMENT;
        }
        if self.more_fragments {
            flags |= Self::FLAG_MORE_FRAGMENTS;
        }
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.message_id.to_wire());
        buf.put_u8(flags);
        buf.put_u16(0);
        buf.put_u32(self.message_length);
        buf.put_i64(self.sequence.value());
        buf.put_slice(&self.publication_id.as_bytes());
        buf.put_u32(self.fragment_number);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::Malformed(format!(
                "sample header needs {} bytes, have {}",
                Self::SIZE,
                buf.remaining()
            )));
        }
        let message_id = MessageId::from_wire(buf.get_u8())?;
        let flags = buf.get_u8();
        buf.advance(2);
        let message_length = buf.get_u32();
        let sequence = SequenceNumber::new(buf.get_i64());
        let mut guid = [0u8; 16];
        buf.copy_to_slice(&mut guid);
        let fragment_number = buf.get_u32();
        Ok(Self {
            message_id,
            fragment: flags & Self::FLAG_FRAGMENT != 0,
            more_fragments: flags & Self::FLAG_MORE_FRAGMENTS != 0,
            message_length,
            sequence,
            publication_id: GUID::from_bytes(guid),
            fragment_number,
        })
    }
}

/// One sample decoded from a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedSample {
    pub header: SampleHeader,
    pub payload: Bytes,
}

/// Decode a whole packet into its header and samples.
pub fn parse_packet(mut data: Bytes) -> Result<(PacketHeader, Vec<ReceivedSample>)> {
    let header = PacketHeader::decode(&mut data)?;
    if data.len() != header.length as usize {
        return Err(Error::Malformed(format!(
            "packet length {} but {} bytes follow",
            header.length,
            data.len()
        )));
    }
    let mut samples = Vec::new();
    while data.has_remaining() {
        let sample = SampleHeader::decode(&mut data)?;
        let len = sample.message_length as usize;
        if data.len() < len {
            return Err(Error::Malformed(format!(
                "sample needs {} bytes, have {}",
                len,
                data.len()
            )));
        }
        let payload = data.split_to(len);
        samples.push(ReceivedSample {
            header: sample,
            payload,
        });
    }
    Ok((header, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_layout() {
        let mut header = PacketHeader::new([7; 12]);
        header.length = 100;
        header.sequence = SequenceNumber::new(42);
        header.first_fragment = true;
        let bytes = header.encode();
        assert_eq!(bytes.len(), PacketHeader::SIZE);
        assert_eq!(&bytes[0..4], b"HDSP");
        assert_eq!(bytes[5], 0x01);
        assert_eq!(PacketHeader::decode(&mut bytes.clone()).unwrap(), header);
    }

    #[test]
    fn test_sample_header_layout() {
        let mut header = SampleHeader::new(
            MessageId::SampleData,
            GUID::from_parts(3, 0x102),
            SequenceNumber::new(9),
        );
        header.fragment = true;
        header.more_fragments = true;
        header.fragment_number = 2;
        header.message_length = 5;
        let bytes = header.encode();
        assert_eq!(bytes.len(), SampleHeader::SIZE);
        assert_eq!(SampleHeader::decode(&mut bytes.clone()).unwrap(), header);
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let mut header = PacketHeader::new([0; 12]);
        header.length = 10;
        let err = parse_packet(header.encode()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        let mut bad = BytesMut::from(&PacketHeader::new([0; 12]).encode()[..]);
        bad[0] = b'X';
        assert!(parse_packet(bad.freeze()).is_err());
    }

    #[test]
    fn test_parse_two_samples() {
        let pub_id = GUID::from_parts(1, 1);
        let mut body = BytesMut::new();
        for (seq, payload) in [(1i64, &b"ab"[..]), (2, &b"cde"[..])] {
            let mut sh = SampleHeader::new(MessageId::SampleData, pub_id, SequenceNumber::new(seq));
            sh.message_length = payload.len() as u32;
            body.put(sh.encode());
            body.put_slice(payload);
        }
        let mut ph = PacketHeader::new([1; 12]);
        ph.length = body.len() as u32;
        let mut packet = BytesMut::new();
        packet.put(ph.encode());
        packet.put(body);

        let (header, samples) = parse_packet(packet.freeze()).unwrap();
        assert_eq!(header.length as usize, 2 * SampleHeader::SIZE + 5);
        assert_eq!(samples.len(), 2);
        assert_eq!(&samples[1].payload[..], b"cde");
        assert_eq!(samples[1].header.sequence, SequenceNumber::new(2));
    }
}
