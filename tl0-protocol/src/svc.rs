//! SVC NAL Header Extension
//!
//! NAL unit types 14 (prefix) and 20 (coded slice extension) carry a 3-byte
//! header extension after the one-byte NAL header:
//!
//! ```text
//! byte0: R(1) I(1) PRID(6)
//! byte1: N(1) DID(3) QID(4)
//! byte2: TID(3) U(1) D(1) O(1) RR(2)
//! ```
//!
//! The reserved bits R and RR are written as all-ones and ignored on input.

use crate::codec::{read_array, ParseError};
use bytes::{BufMut, BytesMut};

/// Size of the SVC header extension in bytes
pub const SVC_HEADER_SIZE: usize = 3;

const RESERVED_ONE_BIT: u8 = 0x80;
const RESERVED_THREE_2BITS: u8 = 0x03;

/// Decoded SVC header extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SvcHeader {
    /// IDR flag
    pub idr: bool,
    /// Priority ID (6 bits)
    pub priority_id: u8,
    /// Inter-layer prediction flag (inverse of `no_inter_layer_pred`)
    pub inter_layer_pred: bool,
    /// Dependency ID (3 bits)
    pub dependency_id: u8,
    /// Quality ID (4 bits)
    pub quality_id: u8,
    /// Temporal ID (3 bits)
    pub temporal_id: u8,
    /// Use reference base picture flag
    pub use_ref_base: bool,
    /// Discardable flag
    pub discardable: bool,
    /// Output flag
    pub output: bool,
}

impl SvcHeader {
    /// Decode the extension starting at `pos`
    pub fn decode(bytes: &[u8], pos: usize) -> Result<Self, ParseError> {
        let [b0, b1, b2] = read_array::<SVC_HEADER_SIZE>(bytes, pos)?;
        Ok(Self::from_array([b0, b1, b2]))
    }

    /// Decode from exactly three bytes
    pub fn from_array(raw: [u8; SVC_HEADER_SIZE]) -> Self {
        let [b0, b1, b2] = raw;
        SvcHeader {
            idr: b0 & 0x40 != 0,
            priority_id: b0 & 0x3F,
            inter_layer_pred: b1 & 0x80 != 0,
            dependency_id: (b1 >> 4) & 0x07,
            quality_id: b1 & 0x0F,
            temporal_id: (b2 >> 5) & 0x07,
            use_ref_base: b2 & 0x10 != 0,
            discardable: b2 & 0x08 != 0,
            output: b2 & 0x04 != 0,
        }
    }

    /// Encode to the 3-byte wire form; values wider than their field are masked
    pub fn encode(&self) -> [u8; SVC_HEADER_SIZE] {
        let mut b0 = RESERVED_ONE_BIT | (self.priority_id & 0x3F);
        if self.idr {
            b0 |= 0x40;
        }

        let mut b1 = ((self.dependency_id & 0x07) << 4) | (self.quality_id & 0x0F);
        if self.inter_layer_pred {
            b1 |= 0x80;
        }

        let mut b2 = ((self.temporal_id & 0x07) << 5) | RESERVED_THREE_2BITS;
        if self.use_ref_base {
            b2 |= 0x10;
        }
        if self.discardable {
            b2 |= 0x08;
        }
        if self.output {
            b2 |= 0x04;
        }

        [b0, b1, b2]
    }

    /// Serialize into a buffer
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.encode());
    }

    /// True for the mandatory base temporal layer
    #[inline]
    pub fn is_base_layer(&self) -> bool {
        self.temporal_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reserved_bits() {
        let bytes = SvcHeader::default().encode();
        assert_eq!(bytes, [0x80, 0x00, 0x03]);
    }

    #[test]
    fn test_decode_fields() {
        // R=1 I=1 PRID=5 | N=1 DID=2 QID=3 | TID=2 U=0 D=1 O=1 RR=3
        let bytes = [0xC5, 0xA3, 0x4F];
        let svc = SvcHeader::decode(&bytes, 0).unwrap();

        assert!(svc.idr);
        assert_eq!(svc.priority_id, 5);
        assert!(svc.inter_layer_pred);
        assert_eq!(svc.dependency_id, 2);
        assert_eq!(svc.quality_id, 3);
        assert_eq!(svc.temporal_id, 2);
        assert!(!svc.use_ref_base);
        assert!(svc.discardable);
        assert!(svc.output);

        assert_eq!(svc.encode(), bytes);
    }

    #[test]
    fn test_decode_ignores_reserved_bits() {
        let with = SvcHeader::decode(&[0xBF, 0x00, 0xE3], 0).unwrap();
        let without = SvcHeader::decode(&[0x3F, 0x00, 0xE0], 0).unwrap();
        assert_eq!(with, without);
        assert_eq!(with.temporal_id, 7);
        assert_eq!(with.priority_id, 63);
    }

    #[test]
    fn test_decode_at_offset() {
        let bytes = [0x74, 0x80, 0x00, 0x23];
        let svc = SvcHeader::decode(&bytes, 1).unwrap();
        assert_eq!(svc.temporal_id, 1);
        assert!(!svc.is_base_layer());
    }

    #[test]
    fn test_decode_truncated() {
        let err = SvcHeader::decode(&[0x74, 0x80, 0x00], 1).unwrap_err();
        assert_eq!(
            err,
            ParseError::Truncated {
                needed: 4,
                available: 3
            }
        );
    }
}
