//! TL0 Descriptor and Aggregate Packets
//!
//! Every outgoing NAL unit is wrapped in an aggregate packet (NAL type 31)
//! whose first 10 bytes describe the layer of the NAL unit and the RTP
//! sequence span of its TL0 access unit:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|NRI|  Type   |R|I|   PRID    |N| DID |  QID  | TID |U|D|O| RR|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |S|   Count     |  TL0PICIDX    |        First sequence         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Last sequence          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::codec::{read_array, ParseError};
use crate::nal::{nal_type, NalHeader};
use crate::sequence::{RtpSeq, SeqSpan};
use crate::svc::SvcHeader;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the TL0 descriptor in bytes
pub const DESCRIPTOR_SIZE: usize = 10;

/// NAL type of an aggregate packet carrying a descriptor
pub const NAL_TYPE_AGGREGATE: u8 = nal_type::AGGREGATE;

/// Largest value of the 7-bit enhancement count field
pub const MAX_ENHANCEMENT_COUNT: u8 = 0x7F;

/// Layer descriptor attached to each aggregate packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tl0Descriptor {
    /// nal_ref_idc of the carried NAL unit (2 bits)
    pub nal_ref_idc: u8,
    /// SVC header of the carried NAL unit
    pub svc: SvcHeader,
    /// Number of NAL units in an enhancement access unit (7 bits)
    pub enhancement_count: u8,
    /// Distinguishes the two temporal-2 pictures of one TL0 period
    pub sequence_id: bool,
    /// TL0 picture index of the owning base picture
    pub base_layer_index: u8,
    /// RTP sequence span of the owning base access unit
    pub span: SeqSpan,
}

impl Tl0Descriptor {
    /// Temporal id of the carried NAL unit
    #[inline]
    pub fn temporal_id(&self) -> u8 {
        self.svc.temporal_id
    }

    /// True when the carried NAL unit belongs to the base layer
    #[inline]
    pub fn is_base_layer(&self) -> bool {
        self.svc.is_base_layer()
    }

    /// Encode to the 10-byte wire form
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let header = NalHeader {
            forbidden: false,
            nal_ref_idc: self.nal_ref_idc,
            nal_type: NAL_TYPE_AGGREGATE,
        };
        let [s0, s1, s2] = self.svc.encode();
        let first = self.span.first.as_raw().to_be_bytes();
        let last = self.span.last.as_raw().to_be_bytes();

        [
            header.to_byte(),
            s0,
            s1,
            s2,
            ((self.sequence_id as u8) << 7) | (self.enhancement_count & MAX_ENHANCEMENT_COUNT),
            self.base_layer_index,
            first[0],
            first[1],
            last[0],
            last[1],
        ]
    }

    /// Serialize into a buffer
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.encode());
    }

    /// Decode a descriptor starting at `pos`
    pub fn decode(bytes: &[u8], pos: usize) -> Result<Self, ParseError> {
        let raw = read_array::<DESCRIPTOR_SIZE>(bytes, pos)?;

        let header = NalHeader::from_byte(raw[0]);
        if header.forbidden {
            return Err(ParseError::ForbiddenBit);
        }
        if header.nal_type != NAL_TYPE_AGGREGATE {
            return Err(ParseError::NotAggregate(header.nal_type));
        }

        Ok(Tl0Descriptor {
            nal_ref_idc: header.nal_ref_idc,
            svc: SvcHeader::from_array([raw[1], raw[2], raw[3]]),
            enhancement_count: raw[4] & MAX_ENHANCEMENT_COUNT,
            sequence_id: raw[4] & 0x80 != 0,
            base_layer_index: raw[5],
            span: SeqSpan::new(
                RtpSeq::new(u16::from_be_bytes([raw[6], raw[7]])),
                RtpSeq::new(u16::from_be_bytes([raw[8], raw[9]])),
            ),
        })
    }
}

/// Build the wire form of a descriptor from its parts
pub fn encode_descriptor(
    svc: SvcHeader,
    base_layer_index: u8,
    first_seq: RtpSeq,
    last_seq: RtpSeq,
    enhancement_count: u8,
    sequence_id: bool,
    nal_ref_idc: u8,
) -> [u8; DESCRIPTOR_SIZE] {
    Tl0Descriptor {
        nal_ref_idc,
        svc,
        enhancement_count,
        sequence_id,
        base_layer_index,
        span: SeqSpan::new(first_seq, last_seq),
    }
    .encode()
}

/// Decode a descriptor starting at `pos`
pub fn decode_descriptor(bytes: &[u8], pos: usize) -> Result<Tl0Descriptor, ParseError> {
    Tl0Descriptor::decode(bytes, pos)
}

/// Peek whether an RTP payload is an aggregate packet with a descriptor
#[inline]
pub fn is_aggregate(payload: &[u8]) -> bool {
    payload
        .first()
        .map(|&b| NalHeader::from_byte(b).nal_type == NAL_TYPE_AGGREGATE)
        .unwrap_or(false)
}

/// A descriptor followed by exactly one NAL unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatePacket {
    pub descriptor: Tl0Descriptor,
    /// NAL unit bytes, header byte included
    pub nal: Bytes,
}

impl AggregatePacket {
    pub fn new(descriptor: Tl0Descriptor, nal: Bytes) -> Self {
        AggregatePacket { descriptor, nal }
    }

    /// Parse an RTP payload
    pub fn parse(payload: Bytes) -> Result<Self, ParseError> {
        let descriptor = Tl0Descriptor::decode(&payload, 0)?;
        if payload.len() == DESCRIPTOR_SIZE {
            return Err(ParseError::EmptyNalUnit);
        }
        let nal = payload.slice(DESCRIPTOR_SIZE..);
        Ok(AggregatePacket { descriptor, nal })
    }

    /// Header of the carried NAL unit
    pub fn nal_header(&self) -> NalHeader {
        NalHeader::from_byte(self.nal[0])
    }

    /// Total wire size
    pub fn size(&self) -> usize {
        DESCRIPTOR_SIZE + self.nal.len()
    }

    /// Serialize to the wire form
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.descriptor.to_bytes(&mut buf);
        buf.put_slice(&self.nal);
        buf.freeze()
    }
}
