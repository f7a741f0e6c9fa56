//! Base-layer Retransmission Requests
//!
//! Converts the tracker's missing base-layer sequence numbers into RTCP
//! generic NACK records (RFC 4585 §6.2.1). Each missing number passes a
//! per-slot retry gate so that a packet is re-requested at most once every
//! [`MAX_NACK_TOLERANCE`] polls.

use crate::codec::{read_array, ParseError};
use crate::sequence::RtpSeq;
use crate::tracker::{Tl0Info, Tl0Tracker};
use bytes::{BufMut, BytesMut};
use std::fmt;
use tracing::debug;

/// Polls between two requests for the same missing packet
pub const MAX_NACK_TOLERANCE: u8 = 5;

/// Size of one generic NACK FCI entry
pub const NACK_RECORD_SIZE: usize = 4;

/// Number of sequence numbers one record can cover
const RECORD_SPAN: u16 = 17;

/// Generic NACK FCI entry
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            PID (fsn)          |             BLP               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Bit *i* of BLP reports `fsn + i + 1` as lost.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NackRecord {
    pub fsn: RtpSeq,
    pub blp: u16,
}

impl NackRecord {
    pub fn new(fsn: RtpSeq) -> Self {
        NackRecord { fsn, blp: 0 }
    }

    /// Add `seq` to the record if it falls inside its reach
    pub fn try_add(&mut self, seq: RtpSeq) -> bool {
        match self.fsn.forward_to(seq) {
            0 => true,
            d if d < RECORD_SPAN => {
                self.blp |= 1 << (d - 1);
                true
            }
            _ => false,
        }
    }

    /// Every sequence number reported lost by this record
    pub fn covered(&self) -> impl Iterator<Item = RtpSeq> {
        let fsn = self.fsn;
        let blp = self.blp;
        std::iter::once(fsn).chain(
            (0..16u16)
                .filter(move |bit| blp & (1 << bit) != 0)
                .map(move |bit| fsn + (bit + 1)),
        )
    }

    /// Serialize the FCI entry (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u16(self.fsn.as_raw());
        buf.put_u16(self.blp);
    }

    /// Parse an FCI entry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let raw = read_array::<NACK_RECORD_SIZE>(bytes, 0)?;
        Ok(NackRecord {
            fsn: RtpSeq::new(u16::from_be_bytes([raw[0], raw[1]])),
            blp: u16::from_be_bytes([raw[2], raw[3]]),
        })
    }
}

impl fmt::Debug for NackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NackRecord(fsn={}, blp={:#018b})", self.fsn, self.blp)
    }
}

/// Batch ascending sequence numbers into NACK records
pub fn batch(seqs: impl IntoIterator<Item = RtpSeq>) -> Vec<NackRecord> {
    let mut records: Vec<NackRecord> = Vec::new();
    for seq in seqs {
        let added = records.last_mut().map(|r| r.try_add(seq)).unwrap_or(false);
        if !added {
            records.push(NackRecord::new(seq));
        }
    }
    records
}

/// Schedules retransmission requests for incomplete TL0 access units
#[derive(Debug, Clone)]
pub struct RetransmissionScheduler {
    tolerance: u8,
}

impl Default for RetransmissionScheduler {
    fn default() -> Self {
        Self::new(MAX_NACK_TOLERANCE)
    }
}

impl RetransmissionScheduler {
    /// Create a scheduler re-requesting a packet every `tolerance` polls
    pub fn new(tolerance: u8) -> Self {
        RetransmissionScheduler {
            tolerance: tolerance.max(1),
        }
    }

    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    /// Slots to scan for an entry
    ///
    /// While the entry is the newest one and no enhancement packet has shown
    /// up, packets after the last one received may simply not have been sent
    /// yet, so only the gaps before it are considered lost.
    fn scan_length(info: &Tl0Info, has_later_entry: bool) -> usize {
        if info.has_enhancement() || has_later_entry {
            info.expected_count()
        } else {
            info.last_present_slot().unwrap_or(0)
        }
    }

    /// Apply the retry gate to one slot; true when it is due for a request
    fn due(&self, counter: &mut u8) -> bool {
        if *counter == 0 || *counter >= self.tolerance {
            *counter = 1;
            true
        } else {
            *counter += 1;
            false
        }
    }

    /// Collect the NACK records due for every incomplete access unit
    pub fn poll(&self, tracker: &mut Tl0Tracker) -> Vec<NackRecord> {
        let entries = tracker.len();
        let mut records = Vec::new();

        for (position, info) in tracker.iter_mut().enumerate() {
            if info.is_complete() {
                continue;
            }

            let scan = Self::scan_length(info, position + 1 < entries);
            let span = info.span();
            let mut requested = Vec::new();
            for slot in 0..scan {
                if info.is_present(slot) {
                    continue;
                }
                if let Some(counter) = info.retry_counter_mut(slot) {
                    if self.due(counter) {
                        requested.push(span.seq_at(slot));
                    }
                }
            }

            if !requested.is_empty() {
                let batched = batch(requested.iter().copied());
                debug!(
                    "TL0 {}: requesting {} missing packets in {} NACK records",
                    info.base_layer_index(),
                    requested.len(),
                    batched.len()
                );
                records.extend(batched);
            }
        }

        records
    }
}
