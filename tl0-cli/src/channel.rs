//! Lossy channel
//!
//! Drops every Nth first transmission of a sequence number. A retransmission
//! of a dropped packet always gets through.

use std::collections::HashSet;
use tl0::{RtpPacket, RtpSeq};
use tracing::debug;

/// Deterministic packet dropper
#[derive(Debug, Default)]
pub struct LossyChannel {
    drop_every: usize,
    seen: u64,
    dropped: HashSet<RtpSeq>,
    total_dropped: u64,
}

impl LossyChannel {
    /// `drop_every == 0` disables loss
    pub fn new(drop_every: usize) -> Self {
        LossyChannel {
            drop_every,
            ..Default::default()
        }
    }

    /// Whether `packet` makes it across
    pub fn pass(&mut self, packet: &RtpPacket) -> bool {
        let seq = packet.seq();
        if self.dropped.remove(&seq) {
            return true;
        }

        self.seen += 1;
        if self.drop_every == 0 || self.seen % self.drop_every as u64 != 0 {
            return true;
        }

        debug!("channel: dropping {}", seq);
        self.dropped.insert(seq);
        self.total_dropped += 1;
        false
    }

    pub fn dropped(&self) -> u64 {
        self.total_dropped
    }
}
