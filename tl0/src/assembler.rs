//! Decoder input assembly
//!
//! Rebuilds an Annex-B access unit from the RTP payloads the delivery gate
//! lets through: single NAL units, TL0 aggregate packets (descriptor
//! stripped) and FU-A fragments. The access unit is released on the RTP
//! marker bit.

use crate::rtp::RtpHeader;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tl0_protocol::codec::ParseError;
use tl0_protocol::descriptor::DESCRIPTOR_SIZE;
use tl0_protocol::nal::{nal_type, NalHeader};
use tracing::{debug, trace};

const START_CODE: [u8; 3] = [0, 0, 1];

/// Largest access unit buffered before it is discarded
pub const DEFAULT_MAX_ACCESS_UNIT_SIZE: usize = 4 * 1024 * 1024;

/// Assembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("No keyframe received yet; access unit dropped")]
    MissingKeyframe,

    #[error("FU-A fragment without a start fragment")]
    FragmentWithoutStart,

    #[error("Access unit exceeds {max} bytes")]
    TooLarge { max: usize },
}

/// Consumer of gated RTP payloads
pub trait DecoderInput {
    /// Feed one payload; returns a complete access unit on the marker packet
    fn accept(&mut self, header: &RtpHeader, payload: &[u8]) -> Result<Option<Bytes>, AssembleError>;

    /// Discard the partially assembled access unit
    fn flush(&mut self);

    /// Resynchronize after a decoder error
    fn resync(&mut self) {
        self.flush();
    }
}

/// Annex-B access unit assembler
#[derive(Debug)]
pub struct AccessUnitAssembler {
    buf: BytesMut,
    got_keyframe: bool,
    in_fragment: bool,
    max_size: usize,
}

impl Default for AccessUnitAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACCESS_UNIT_SIZE)
    }
}

impl AccessUnitAssembler {
    pub fn new(max_size: usize) -> Self {
        AccessUnitAssembler {
            buf: BytesMut::new(),
            got_keyframe: false,
            in_fragment: false,
            max_size,
        }
    }

    /// Whether a parameter set has been seen since the last resync
    pub fn has_keyframe(&self) -> bool {
        self.got_keyframe
    }

    /// Forget the keyframe; access units are dropped until the next SPS/PPS
    pub fn reset_keyframe(&mut self) {
        self.got_keyframe = false;
    }

    /// Bytes of the partially assembled access unit
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    fn reserve(&mut self, additional: usize) -> Result<(), AssembleError> {
        if self.buf.len() + additional > self.max_size {
            self.flush();
            return Err(AssembleError::TooLarge { max: self.max_size });
        }
        Ok(())
    }

    /// Append a complete NAL unit (header byte first)
    fn push_nal(&mut self, nal: &[u8]) -> Result<(), AssembleError> {
        let header = NalHeader::from_byte(nal[0]);
        if !(1..=23).contains(&header.nal_type) {
            return Err(ParseError::UnsupportedNalType(header.nal_type).into());
        }
        if matches!(header.nal_type, nal_type::SPS | nal_type::PPS) {
            self.got_keyframe = true;
        }

        self.reserve(START_CODE.len() + nal.len())?;
        self.buf.put_slice(&START_CODE);
        self.buf.put_slice(nal);
        Ok(())
    }

    fn push_fragment(&mut self, payload: &[u8]) -> Result<(), AssembleError> {
        if payload.len() < 2 {
            return Err(ParseError::Truncated {
                needed: 2,
                available: payload.len(),
            }
            .into());
        }
        let indicator = payload[0];
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let body = &payload[2..];

        if start {
            let header = (indicator & 0xE0) | (fu_header & 0x1F);
            self.reserve(START_CODE.len() + 1 + body.len())?;
            self.buf.put_slice(&START_CODE);
            self.buf.put_u8(header);
            self.in_fragment = true;
        } else if !self.in_fragment {
            return Err(AssembleError::FragmentWithoutStart);
        } else {
            self.reserve(body.len())?;
        }

        self.buf.put_slice(body);
        if end {
            self.in_fragment = false;
        }
        Ok(())
    }
}

impl DecoderInput for AccessUnitAssembler {
    fn accept(&mut self, header: &RtpHeader, payload: &[u8]) -> Result<Option<Bytes>, AssembleError> {
        let Some(&first) = payload.first() else {
            return Err(ParseError::EmptyNalUnit.into());
        };

        let nal_header = NalHeader::from_byte(first);
        if nal_header.forbidden {
            return Err(ParseError::ForbiddenBit.into());
        }

        match nal_header.nal_type {
            1..=23 => self.push_nal(payload)?,
            nal_type::FU_A => self.push_fragment(payload)?,
            nal_type::AGGREGATE => match payload.get(DESCRIPTOR_SIZE..) {
                Some(nal) if !nal.is_empty() => self.push_nal(nal)?,
                _ => return Err(ParseError::EmptyNalUnit.into()),
            },
            other => return Err(ParseError::UnsupportedNalType(other).into()),
        }

        if !header.marker {
            return Ok(None);
        }

        let access_unit = self.buf.split().freeze();
        self.in_fragment = false;
        if !self.got_keyframe {
            debug!("Dropping {} byte access unit: waiting for keyframe", access_unit.len());
            return Err(AssembleError::MissingKeyframe);
        }

        trace!("Access unit ready ({} bytes)", access_unit.len());
        Ok(Some(access_unit))
    }

    fn flush(&mut self) {
        self.buf.clear();
        self.in_fragment = false;
    }

    fn resync(&mut self) {
        self.flush();
        self.reset_keyframe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl0_protocol::descriptor::{AggregatePacket, Tl0Descriptor};
    use tl0_protocol::sequence::{RtpSeq, SeqSpan};
    use tl0_protocol::svc::SvcHeader;

    fn header(marker: bool) -> RtpHeader {
        RtpHeader::new(RtpSeq::new(0), 0, 1, marker)
    }

    fn aggregate(nal: &'static [u8]) -> Bytes {
        let descriptor = Tl0Descriptor {
            nal_ref_idc: 3,
            svc: SvcHeader::default(),
            enhancement_count: 1,
            sequence_id: false,
            base_layer_index: 0,
            span: SeqSpan::new(RtpSeq::new(0), RtpSeq::new(2)),
        };
        AggregatePacket::new(descriptor, Bytes::from_static(nal)).to_bytes()
    }

    #[test]
    fn test_assembles_aggregates() {
        let mut asm = AccessUnitAssembler::default();
        assert_eq!(asm.accept(&header(false), &aggregate(&[0x67, 0x42])).unwrap(), None);
        assert_eq!(asm.accept(&header(false), &aggregate(&[0x68, 0xCE])).unwrap(), None);
        let au = asm
            .accept(&header(true), &aggregate(&[0x65, 0x88]))
            .unwrap()
            .unwrap();

        assert_eq!(
            &au[..],
            &[0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65, 0x88]
        );
        assert!(asm.has_keyframe());
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn test_drops_without_keyframe() {
        let mut asm = AccessUnitAssembler::default();
        assert_eq!(
            asm.accept(&header(true), &[0x41, 0x9A]),
            Err(AssembleError::MissingKeyframe)
        );
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn test_fu_a() {
        let mut asm = AccessUnitAssembler::default();
        asm.accept(&header(false), &[0x67, 0x42]).unwrap();
        // FU indicator NRI=3 type 28, FU header S=1 type 5
        asm.accept(&header(false), &[0x7C, 0x85, 0xAA, 0xBB]).unwrap();
        let au = asm
            .accept(&header(true), &[0x7C, 0x45, 0xCC])
            .unwrap()
            .unwrap();
        assert_eq!(&au[..], &[0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x65, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_fragment_without_start() {
        let mut asm = AccessUnitAssembler::default();
        assert_eq!(
            asm.accept(&header(false), &[0x7C, 0x05, 0xAA]),
            Err(AssembleError::FragmentWithoutStart)
        );
    }

    #[test]
    fn test_rejects_bad_payloads() {
        let mut asm = AccessUnitAssembler::default();
        assert_eq!(
            asm.accept(&header(false), &[]),
            Err(AssembleError::Parse(ParseError::EmptyNalUnit))
        );
        assert_eq!(
            asm.accept(&header(false), &[0x80]),
            Err(AssembleError::Parse(ParseError::ForbiddenBit))
        );
        assert_eq!(
            asm.accept(&header(false), &[0x18, 0x00]),
            Err(AssembleError::Parse(ParseError::UnsupportedNalType(24)))
        );
        assert_eq!(
            asm.accept(&header(false), &aggregate(&[0x7C, 0x85])),
            Err(AssembleError::Parse(ParseError::UnsupportedNalType(28)))
        );
    }

    #[test]
    fn test_flush_and_resync() {
        let mut asm = AccessUnitAssembler::default();
        asm.accept(&header(false), &[0x67, 0x42]).unwrap();
        asm.flush();
        assert_eq!(asm.pending_len(), 0);
        assert!(asm.has_keyframe());

        asm.resync();
        assert!(!asm.has_keyframe());
    }

    #[test]
    fn test_size_limit() {
        let mut asm = AccessUnitAssembler::new(8);
        asm.accept(&header(false), &[0x67, 0x42]).unwrap();
        assert_eq!(
            asm.accept(&header(false), &[0x41, 1, 2, 3]),
            Err(AssembleError::TooLarge { max: 8 })
        );
        assert_eq!(asm.pending_len(), 0);
    }
}
