//! NAL unit scanning
//!
//! Splits an Annex-B byte stream into NAL unit records. Each record is a view
//! into the caller's buffer; nothing is copied.

use crate::codec::{CapacityError, ParseError, MAX_NALUS_PER_ACCESS_UNIT};
use std::iter::FusedIterator;

/// NAL unit types used by the TL0 scheme
pub mod nal_type {
    /// Coded slice of a non-IDR picture
    pub const SLICE: u8 = 1;
    /// Coded slice of an IDR picture
    pub const IDR: u8 = 5;
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
    /// SVC prefix NAL unit
    pub const PREFIX: u8 = 14;
    /// Subset sequence parameter set
    pub const SUBSET_SPS: u8 = 15;
    /// Coded slice extension (SVC)
    pub const SLICE_EXTENSION: u8 = 20;
    /// FU-A fragmentation unit (RFC 6184)
    pub const FU_A: u8 = 28;
    /// Aggregate packet carrying a TL0 descriptor
    pub const AGGREGATE: u8 = 31;
}

/// `nal_ref_idc` forced on IDR slices and parameter sets
pub const NRI_REQUIRED_FOR_REFERENCE: u8 = 3;

/// One-byte NAL unit header
///
/// ```text
/// +-+-+-+-+-+-+-+-+
/// |F|NRI|  Type   |
/// +-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// Forbidden zero bit
    pub forbidden: bool,
    /// nal_ref_idc (2 bits)
    pub nal_ref_idc: u8,
    /// NAL unit type (5 bits)
    pub nal_type: u8,
}

impl NalHeader {
    /// Decode a header byte
    pub fn from_byte(byte: u8) -> Self {
        NalHeader {
            forbidden: byte & 0x80 != 0,
            nal_ref_idc: (byte >> 5) & 0x03,
            nal_type: byte & 0x1F,
        }
    }

    /// Encode back to a header byte
    pub fn to_byte(self) -> u8 {
        ((self.forbidden as u8) << 7) | ((self.nal_ref_idc & 0x03) << 5) | (self.nal_type & 0x1F)
    }

    /// Types 14 and 20 carry the 3-byte SVC header extension
    pub fn has_svc_extension(&self) -> bool {
        matches!(self.nal_type, nal_type::PREFIX | nal_type::SLICE_EXTENSION)
    }

    /// `nal_ref_idc` as it must be advertised
    ///
    /// IDR slices, SPS and PPS are always required for reference regardless
    /// of the bits present on the wire.
    pub fn effective_nal_ref_idc(&self) -> u8 {
        match self.nal_type {
            nal_type::IDR | nal_type::SPS | nal_type::PPS => NRI_REQUIRED_FOR_REFERENCE,
            _ => self.nal_ref_idc,
        }
    }
}

/// Position of one NAL unit inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    /// Offset of the start code
    pub start: usize,
    /// Start code length (3 or 4)
    pub start_code_len: usize,
    /// Offset of the NAL header byte
    pub payload_offset: usize,
    /// Length of the NAL unit (header byte included)
    pub payload_len: usize,
    /// Decoded NAL header
    pub header: NalHeader,
}

impl NalUnit {
    /// The NAL unit bytes (header byte included, start code excluded)
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.payload_offset..self.end()]
    }

    /// Offset one past the last byte of the unit
    pub fn end(&self) -> usize {
        self.payload_offset + self.payload_len
    }

    pub fn nal_type(&self) -> u8 {
        self.header.nal_type
    }

    pub fn nal_ref_idc(&self) -> u8 {
        self.header.nal_ref_idc
    }
}

/// Find the next start code at or after `from`
///
/// Returns the offset of the start code (the leading zero of a 4-byte code),
/// or `buf.len()` when no further start code exists.
pub fn find_start_code(buf: &[u8], from: usize) -> usize {
    let mut i = from;
    while i + 2 < buf.len() {
        if buf[i + 2] > 1 {
            // Neither a zero nor the terminating 0x01 can sit here
            i += 3;
            continue;
        }
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            if i > from && buf[i - 1] == 0 {
                return i - 1;
            }
            return i;
        }
        i += 1;
    }
    buf.len()
}

/// Lazy iterator over the NAL units of a buffer
///
/// Yields one item per start code. A unit without a header byte or with NAL
/// type 0 yields a [`ParseError`]; iteration carries on with the next unit.
pub struct NalUnits<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = Result<NalUnit, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }

        let start = self.pos;
        let start_code_len = if self.buf[start..].starts_with(&[0, 0, 0, 1]) {
            4
        } else {
            3
        };
        let payload_offset = (start + start_code_len).min(self.buf.len());
        let next = find_start_code(self.buf, payload_offset);
        self.pos = next;

        let payload_len = next - payload_offset;
        if payload_len == 0 {
            return Some(Err(ParseError::EmptyNalUnit));
        }

        let header = NalHeader::from_byte(self.buf[payload_offset]);
        if header.nal_type == 0 {
            return Some(Err(ParseError::ZeroNalType));
        }

        Some(Ok(NalUnit {
            start,
            start_code_len,
            payload_offset,
            payload_len,
            header,
        }))
    }
}

impl FusedIterator for NalUnits<'_> {}

/// Segment a buffer into NAL units
///
/// Bytes before the first start code are ignored.
pub fn segment(buf: &[u8]) -> NalUnits<'_> {
    NalUnits {
        buf,
        pos: find_start_code(buf, 0),
    }
}

/// Segment one access unit, enforcing the per-access-unit capacity
pub fn split_access_unit(
    buf: &[u8],
) -> Result<Vec<Result<NalUnit, ParseError>>, CapacityError> {
    let mut units = Vec::new();
    for unit in segment(buf) {
        if units.len() == MAX_NALUS_PER_ACCESS_UNIT {
            return Err(CapacityError::TooManyNalUnits {
                max: MAX_NALUS_PER_ACCESS_UNIT,
            });
        }
        units.push(unit);
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_start_code() {
        let data = [0xAA, 0x00, 0x00, 0x01, 0x65];
        assert_eq!(find_start_code(&data, 0), 1);

        let data = [0x00, 0x00, 0x00, 0x01, 0x67];
        assert_eq!(find_start_code(&data, 0), 0);

        let data = [0x11, 0x22, 0x33];
        assert_eq!(find_start_code(&data, 0), 3);
    }

    #[test]
    fn test_segment_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS, 4-byte code
            0x00, 0x00, 0x01, 0x68, 0xCE, // PPS, 3-byte code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR, 4-byte code
        ];

        let units: Vec<NalUnit> = segment(&data).map(Result::unwrap).collect();
        assert_eq!(units.len(), 3);

        assert_eq!(units[0].start_code_len, 4);
        assert_eq!(units[0].payload(&data), &[0x67, 0x42]);
        assert_eq!(units[0].nal_type(), nal_type::SPS);

        assert_eq!(units[1].start_code_len, 3);
        assert_eq!(units[1].payload(&data), &[0x68, 0xCE]);

        assert_eq!(units[2].start, 11);
        assert_eq!(units[2].payload(&data), &[0x65, 0x88, 0x84]);
        assert_eq!(units[2].nal_ref_idc(), 3);
    }

    #[test]
    fn test_segment_reports_bad_units_and_continues() {
        let data = [
            0x00, 0x00, 0x01, // empty unit
            0x00, 0x00, 0x01, 0x00, 0x11, // type 0
            0x00, 0x00, 0x01, 0x41, 0x9A, // P slice
        ];

        let units: Vec<_> = segment(&data).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], Err(ParseError::EmptyNalUnit));
        assert_eq!(units[1], Err(ParseError::ZeroNalType));
        assert_eq!(units[2].as_ref().unwrap().nal_type(), nal_type::SLICE);
    }

    #[test]
    fn test_split_access_unit_capacity() {
        let mut data = Vec::new();
        for _ in 0..MAX_NALUS_PER_ACCESS_UNIT + 1 {
            data.extend_from_slice(&[0x00, 0x00, 0x01, 0x41, 0x9A]);
        }
        assert_eq!(
            split_access_unit(&data),
            Err(CapacityError::TooManyNalUnits {
                max: MAX_NALUS_PER_ACCESS_UNIT
            })
        );

        data.truncate(data.len() - 5);
        assert_eq!(split_access_unit(&data).unwrap().len(), MAX_NALUS_PER_ACCESS_UNIT);
    }

    #[test]
    fn test_effective_nri() {
        assert_eq!(NalHeader::from_byte(0x05).effective_nal_ref_idc(), 3);
        assert_eq!(NalHeader::from_byte(0x07).effective_nal_ref_idc(), 3);
        assert_eq!(NalHeader::from_byte(0x21).effective_nal_ref_idc(), 1);
        assert_eq!(NalHeader::from_byte(0x01).effective_nal_ref_idc(), 0);
    }
}
