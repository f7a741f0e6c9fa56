//! RTP Sequence Number Handling
//!
//! RTP uses 16-bit sequence numbers that wrap at 65536. This module provides a
//! wrapped sequence number type and the inclusive span of sequence numbers
//! that one TL0 access unit occupies on the wire.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Size of the RTP sequence number space
pub const SEQ_SPACE: u32 = 1 << 16;

/// RTP sequence number with 16-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct RtpSeq(u16);

impl RtpSeq {
    /// Create a new sequence number
    #[inline]
    pub const fn new(value: u16) -> Self {
        RtpSeq(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u16 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        RtpSeq(self.0.wrapping_add(1))
    }

    /// Calculate the distance from this sequence number to another
    ///
    /// Returns a signed distance that accounts for wraparound. Positive values
    /// mean `other` is ahead of `self`, negative means `other` is behind.
    #[inline]
    pub fn distance_to(self, other: RtpSeq) -> i32 {
        other.0.wrapping_sub(self.0) as i16 as i32
    }

    /// Number of steps forward from `self` to `other`, modulo 65536
    #[inline]
    pub fn forward_to(self, other: RtpSeq) -> u16 {
        other.0.wrapping_sub(self.0)
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: RtpSeq) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: RtpSeq) -> bool {
        self.distance_to(other) < 0
    }
}

impl fmt::Debug for RtpSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RtpSeq({})", self.0)
    }
}

impl fmt::Display for RtpSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for RtpSeq {
    fn from(value: u16) -> Self {
        RtpSeq(value)
    }
}

impl From<RtpSeq> for u16 {
    fn from(seq: RtpSeq) -> u16 {
        seq.0
    }
}

impl Add<u16> for RtpSeq {
    type Output = RtpSeq;

    fn add(self, rhs: u16) -> RtpSeq {
        RtpSeq(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for RtpSeq {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for RtpSeq {
    type Output = RtpSeq;

    fn sub(self, rhs: u16) -> RtpSeq {
        RtpSeq(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u16> for RtpSeq {
    fn sub_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

impl Sub for RtpSeq {
    type Output = i32;

    /// Calculate the signed distance between two sequence numbers
    fn sub(self, rhs: RtpSeq) -> i32 {
        rhs.distance_to(self)
    }
}

/// Inclusive, modulo-65536 range of RTP sequence numbers
///
/// Every base-layer packet of one TL0 access unit carries a sequence number
/// inside the span advertised by its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqSpan {
    /// First sequence number in the span
    pub first: RtpSeq,
    /// Last sequence number in the span (inclusive)
    pub last: RtpSeq,
}

impl SeqSpan {
    /// Create a span from its end points
    pub fn new(first: RtpSeq, last: RtpSeq) -> Self {
        SeqSpan { first, last }
    }

    /// Create a span of `count` consecutive sequence numbers starting at `first`
    ///
    /// A zero count yields a single-number span.
    pub fn starting_at(first: RtpSeq, count: u16) -> Self {
        SeqSpan {
            first,
            last: first + count.saturating_sub(1),
        }
    }

    /// Number of sequence numbers covered by the span, in `1..=65536`
    pub fn len(&self) -> usize {
        let first = self.first.as_raw() as u32;
        let last = self.last.as_raw() as u32;
        if last >= first {
            (last - first + 1) as usize
        } else {
            (SEQ_SPACE - first + last + 1) as usize
        }
    }

    /// A span always covers at least one number
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Slot index of `seq` inside the span, if it belongs to it
    pub fn slot_of(&self, seq: RtpSeq) -> Option<usize> {
        let slot = self.first.forward_to(seq) as usize;
        (slot < self.len()).then_some(slot)
    }

    /// Sequence number stored at `slot`
    pub fn seq_at(&self, slot: usize) -> RtpSeq {
        self.first + slot as u16
    }

    /// Check if the span contains a sequence number
    pub fn contains(&self, seq: RtpSeq) -> bool {
        self.slot_of(seq).is_some()
    }

    /// Iterate the span in transmission order
    pub fn iter(&self) -> impl Iterator<Item = RtpSeq> + '_ {
        (0..self.len()).map(move |slot| self.seq_at(slot))
    }
}

impl fmt::Display for SeqSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}
