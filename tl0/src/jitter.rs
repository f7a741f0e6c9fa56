//! Jitter buffering
//!
//! Packets are reordered by RTP sequence number before they reach the
//! delivery gate. [`ReorderBuffer`] is a circular buffer indexed by sequence
//! number that releases packets in order and gives up on a gap once enough
//! later packets have piled up behind it.

use crate::rtp::RtpPacket;
use thiserror::Error;
use tl0_protocol::sequence::RtpSeq;
use tracing::{debug, trace};

/// Jitter buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JitterError {
    #[error("Packet {0} arrived after its slot was released")]
    Late(RtpSeq),

    #[error("Duplicate packet {0}")]
    Duplicate(RtpSeq),

    #[error("Packet {0} is too far ahead of the playout point")]
    OutOfRange(RtpSeq),
}

/// Reordering buffer between the network and the decoder
pub trait JitterBuffer {
    /// Store a packet
    fn put(&mut self, packet: RtpPacket) -> Result<(), JitterError>;

    /// Release the next packet, if one is ready
    fn get(&mut self) -> Option<RtpPacket>;

    /// Drop everything and restart from the next packet put
    fn flush(&mut self);
}

/// Circular reorder buffer
pub struct ReorderBuffer {
    /// Buffer storage (circular)
    buffer: Vec<Option<RtpPacket>>,
    /// Mask for fast modulo (capacity - 1)
    mask: usize,
    /// Next sequence number to release; unset until the first packet
    next_expected: Option<RtpSeq>,
    /// Packets held before a gap is skipped
    depth: usize,
    /// Packets currently stored
    held: usize,
    /// Sequence numbers given up on
    skipped: u64,
}

impl ReorderBuffer {
    /// Create a buffer
    ///
    /// # Arguments
    /// * `capacity` - Reorder window in packets (rounded up to a power of 2)
    /// * `depth` - Packets waiting behind a gap before the gap is skipped
    pub fn new(capacity: usize, depth: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        ReorderBuffer {
            buffer: vec![None; capacity],
            mask: capacity - 1,
            next_expected: None,
            depth: depth.clamp(1, capacity),
            held: 0,
            skipped: 0,
        }
    }

    #[inline]
    fn index(&self, seq: RtpSeq) -> usize {
        (seq.as_raw() as usize) & self.mask
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Packets currently held
    pub fn len(&self) -> usize {
        self.held
    }

    pub fn is_empty(&self) -> bool {
        self.held == 0
    }

    /// Sequence numbers skipped because they never arrived in time
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn next_expected(&self) -> Option<RtpSeq> {
        self.next_expected
    }

    fn take(&mut self, seq: RtpSeq) -> Option<RtpPacket> {
        let idx = self.index(seq);
        let packet = self.buffer[idx].take()?;
        self.held -= 1;
        self.next_expected = Some(seq.next());
        Some(packet)
    }
}

impl JitterBuffer for ReorderBuffer {
    fn put(&mut self, packet: RtpPacket) -> Result<(), JitterError> {
        let seq = packet.seq();
        let next = *self.next_expected.get_or_insert(seq);

        let distance = next.distance_to(seq);
        if distance < 0 {
            return Err(JitterError::Late(seq));
        }
        if distance as usize >= self.buffer.len() {
            return Err(JitterError::OutOfRange(seq));
        }

        let idx = self.index(seq);
        if self.buffer[idx].is_some() {
            return Err(JitterError::Duplicate(seq));
        }

        trace!("jitter: holding {} ({} held)", seq, self.held + 1);
        self.buffer[idx] = Some(packet);
        self.held += 1;
        Ok(())
    }

    fn get(&mut self) -> Option<RtpPacket> {
        let next = self.next_expected?;
        if let Some(packet) = self.take(next) {
            return Some(packet);
        }
        if self.held < self.depth {
            return None;
        }

        // Give up on the gap: release the oldest packet held
        let mut seq = next;
        while self.buffer[self.index(seq)].is_none() {
            seq = seq.next();
        }
        let gap = next.forward_to(seq);
        self.skipped += gap as u64;
        debug!("jitter: skipping {} missing packets before {}", gap, seq);
        self.take(seq)
    }

    fn flush(&mut self) {
        for slot in &mut self.buffer {
            *slot = None;
        }
        self.held = 0;
        self.next_expected = None;
    }
}
