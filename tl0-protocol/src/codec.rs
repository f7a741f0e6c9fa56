//! Shared codec errors and bounds-checked byte access

use thiserror::Error;

/// Maximum number of NAL units accepted in one access unit
pub const MAX_NALUS_PER_ACCESS_UNIT: usize = 128;

/// A NAL unit or descriptor could not be parsed
///
/// The offending unit is rejected; processing continues with the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Truncated input: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("NAL unit has no header byte")]
    EmptyNalUnit,

    #[error("NAL unit type 0 is unspecified")]
    ZeroNalType,

    #[error("Forbidden zero bit set in NAL header")]
    ForbiddenBit,

    #[error("Not a TL0 aggregate packet (NAL type {0})")]
    NotAggregate(u8),

    #[error("Unsupported NAL type {0}")]
    UnsupportedNalType(u8),
}

/// An access unit exceeds a fixed capacity
///
/// The whole access unit is dropped; the caller treats it as a per-frame failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("Access unit holds more than {max} NAL units")]
    TooManyNalUnits { max: usize },

    #[error("Aggregate packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Enhancement access unit of {0} NAL units overflows the 7-bit count field")]
    EnhancementCountOverflow(usize),
}

/// Read `N` bytes starting at `pos`, failing instead of reading past the end
#[inline]
pub(crate) fn read_array<const N: usize>(bytes: &[u8], pos: usize) -> Result<[u8; N], ParseError> {
    let end = pos.checked_add(N).ok_or(ParseError::Truncated {
        needed: usize::MAX,
        available: bytes.len(),
    })?;
    match bytes.get(pos..end) {
        Some(slice) => {
            let mut out = [0u8; N];
            out.copy_from_slice(slice);
            Ok(out)
        }
        None => Err(ParseError::Truncated {
            needed: end,
            available: bytes.len(),
        }),
    }
}
