//! Delivery Gate
//!
//! Decides, for each packet released by the jitter buffer, whether handing
//! it to the decoder respects the temporal layer dependencies of its TL0
//! period. The marker packet of an enhancement lane closes it: DONE when
//! every advertised NAL unit arrived, ABANDONED otherwise. Anything that
//! references an abandoned lane is skipped.

use crate::descriptor::Tl0Descriptor;
use crate::tracker::{EnhancementSlot, Tl0Tracker};
use tracing::{debug, trace};

/// Gate decision for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the packet to the decoder
    Deliver,
    /// Drop the packet and the partially assembled access unit
    Skip,
    /// Discard the partially assembled access unit, then deliver the packet
    FlushThenDeliver,
}

/// Counters kept by the gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub delivered: u64,
    pub skipped: u64,
    pub flushes: u64,
}

/// Layer-dependency gate in front of the decoder
#[derive(Debug, Default)]
pub struct DeliveryGate {
    stats: GateStats,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> GateStats {
        self.stats
    }

    /// Decide what to do with a packet leaving the jitter buffer
    ///
    /// `descriptor` is `None` for packets that carry no TL0 descriptor; those
    /// are always delivered.
    pub fn decide(
        &mut self,
        tracker: &mut Tl0Tracker,
        descriptor: Option<&Tl0Descriptor>,
        marker: bool,
    ) -> Verdict {
        let verdict = match descriptor {
            None => Verdict::Deliver,
            Some(desc) => match EnhancementSlot::from_layer(desc.temporal_id(), desc.sequence_id) {
                None => Self::decide_base(tracker, desc),
                Some(slot) => Self::decide_enhancement(tracker, desc, slot, marker),
            },
        };

        match verdict {
            Verdict::Deliver => self.stats.delivered += 1,
            Verdict::Skip => self.stats.skipped += 1,
            Verdict::FlushThenDeliver => {
                self.stats.delivered += 1;
                self.stats.flushes += 1;
            }
        }
        verdict
    }

    /// A base packet closes out the previous TL0 period
    fn decide_base(tracker: &mut Tl0Tracker, desc: &Tl0Descriptor) -> Verdict {
        let Some(position) = tracker.position(desc.base_layer_index, desc.span) else {
            return Verdict::Deliver;
        };
        let Some(previous) = tracker.previous(position) else {
            return Verdict::Deliver;
        };

        let mut flush = false;
        for slot in EnhancementSlot::ALL {
            if previous.layer(slot).is_partial() {
                previous.abandon(slot);
                flush = true;
            }
        }

        if flush {
            debug!(
                "TL0 {}: previous period left partial enhancement layers, flushing",
                desc.base_layer_index
            );
            Verdict::FlushThenDeliver
        } else {
            Verdict::Deliver
        }
    }

    fn decide_enhancement(
        tracker: &mut Tl0Tracker,
        desc: &Tl0Descriptor,
        slot: EnhancementSlot,
        marker: bool,
    ) -> Verdict {
        let Some(info) = tracker.find(desc.base_layer_index, desc.span) else {
            trace!(
                "TL0 {}: no tracking state for {:?}, skipping",
                desc.base_layer_index,
                slot
            );
            return Verdict::Skip;
        };

        let mut flush = false;
        match slot {
            EnhancementSlot::Temporal1 => {
                if info.layer(EnhancementSlot::Temporal2Leading).is_partial() {
                    info.abandon(EnhancementSlot::Temporal2Leading);
                    flush = true;
                }
            }
            EnhancementSlot::Temporal2Trailing => {
                if !info.layer(EnhancementSlot::Temporal1).is_done() {
                    info.abandon(slot);
                }
            }
            EnhancementSlot::Temporal2Leading => {}
        }

        let layer = *info.layer(slot);
        if layer.is_abandoned() {
            if slot == EnhancementSlot::Temporal1 {
                info.abandon(slot);
            }
            return Verdict::Skip;
        }

        // The marker leaving the jitter buffer closes the lane
        if marker && !layer.is_done() {
            if layer.counts_match() {
                info.complete(slot);
            } else {
                info.abandon(slot);
                return Verdict::Skip;
            }
        }

        if flush {
            Verdict::FlushThenDeliver
        } else {
            Verdict::Deliver
        }
    }
}
