//! RTP packet representation
//!
//! Only the fields the TL0 session layer needs are kept. The wire codec
//! handles the RFC 3550 fixed header; CSRC lists and header extensions are
//! skipped on input and never produced.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tl0_protocol::sequence::RtpSeq;

/// Size of the fixed RTP header
pub const RTP_HEADER_SIZE: usize = 12;

const RTP_VERSION: u8 = 2;

/// RTP wire errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtpError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid padding length {0}")]
    InvalidPadding(u8),
}

/// RTP header fields used by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub seq: RtpSeq,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Set on the last packet of an access unit
    pub marker: bool,
    pub payload_type: u8,
}

impl RtpHeader {
    pub fn new(seq: RtpSeq, timestamp: u32, ssrc: u32, marker: bool) -> Self {
        RtpHeader {
            seq,
            timestamp,
            ssrc,
            marker,
            payload_type: 96,
        }
    }

    /// Serialize the fixed header (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.seq.as_raw());
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}

/// An RTP packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        RtpPacket { header, payload }
    }

    pub fn seq(&self) -> RtpSeq {
        self.header.seq
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        RTP_HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a packet, skipping CSRCs and header extensions
    pub fn from_bytes(bytes: Bytes) -> Result<Self, RtpError> {
        if bytes.len() < RTP_HEADER_SIZE {
            return Err(RtpError::InsufficientData {
                expected: RTP_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..];
        let b0 = buf.get_u8();
        let b1 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::UnsupportedVersion(version));
        }

        let header = RtpHeader {
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7F,
            seq: RtpSeq::new(buf.get_u16()),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        };

        let csrc_count = (b0 & 0x0F) as usize;
        let mut offset = RTP_HEADER_SIZE + 4 * csrc_count;

        if b0 & 0x10 != 0 {
            let ext = bytes.get(offset..offset + 4).ok_or(RtpError::InsufficientData {
                expected: offset + 4,
                actual: bytes.len(),
            })?;
            let words = u16::from_be_bytes([ext[2], ext[3]]) as usize;
            offset += 4 + 4 * words;
        }

        let mut end = bytes.len();
        if b0 & 0x20 != 0 {
            let pad = bytes[end - 1];
            if pad == 0 || (pad as usize) > end - offset.min(end) {
                return Err(RtpError::InvalidPadding(pad));
            }
            end -= pad as usize;
        }

        if offset > end {
            return Err(RtpError::InsufficientData {
                expected: offset,
                actual: end,
            });
        }

        Ok(RtpPacket {
            header,
            payload: bytes.slice(offset..end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let packet = RtpPacket::new(
            RtpHeader::new(RtpSeq::new(4242), 90_000, 0xDEAD_BEEF, true),
            Bytes::from_static(b"payload"),
        );
        let wire = packet.to_bytes();
        assert_eq!(wire.len(), 19);
        assert_eq!(wire[0], 0x80);
        assert_eq!(wire[1], 0x80 | 96);

        let parsed = RtpPacket::from_bytes(wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_skips_csrc_and_extension() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80 | 0x10 | 0x01); // X=1, CC=1
        buf.put_u8(96);
        buf.put_u16(7);
        buf.put_u32(1);
        buf.put_u32(2);
        buf.put_u32(0x1111_1111); // CSRC
        buf.put_u16(0xBEDE);
        buf.put_u16(1);
        buf.put_u32(0); // one extension word
        buf.put_slice(b"abc");

        let parsed = RtpPacket::from_bytes(buf.freeze()).unwrap();
        assert_eq!(&parsed.payload[..], b"abc");
        assert_eq!(parsed.seq(), RtpSeq::new(7));
        assert!(!parsed.header.marker);
    }

    #[test]
    fn test_padding() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80 | 0x20);
        buf.put_u8(96);
        buf.put_u16(1);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_slice(&[1, 2, 0, 0, 3]);

        let parsed = RtpPacket::from_bytes(buf.freeze()).unwrap();
        assert_eq!(&parsed.payload[..], &[1, 2]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            RtpPacket::from_bytes(Bytes::from_static(&[0x80; 5])),
            Err(RtpError::InsufficientData {
                expected: 12,
                actual: 5
            })
        );
        assert_eq!(
            RtpPacket::from_bytes(Bytes::from_static(&[0x40; 12])),
            Err(RtpError::UnsupportedVersion(1))
        );
    }
}
