//! Receiver-side TL0 Access Unit Tracking
//!
//! The tracker keeps one [`Tl0Info`] per in-flight TL0 access unit, keyed by
//! its TL0 picture index and RTP sequence span. Base-layer packets fill a
//! presence table over the span; enhancement packets update one of three
//! per-period enhancement lanes.
//!
//! TL0 indices wrap after 256 base pictures. When a packet reuses an index
//! with a different span the stale entry is evicted ("cycle detected") and
//! the packet starts a fresh entry.

use crate::codec::MAX_NALUS_PER_ACCESS_UNIT;
use crate::sequence::{RtpSeq, SeqSpan};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Tracker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Failed to allocate tracking state for {slots} sequence numbers")]
    Resource { slots: usize },

    #[error("Sequence number {seq} outside access unit span {span}")]
    OutOfSpan { seq: RtpSeq, span: SeqSpan },

    #[error("Span {span} longer than {max} packets")]
    SpanTooLong { span: SeqSpan, max: usize },

    #[error("Temporal layer 0 has no enhancement lane")]
    NotEnhancement,
}

/// Logical enhancement lanes of one TL0 period, in coding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnhancementSlot {
    /// Temporal id ≥ 2 coded before the temporal-1 picture (sequence-id bit 1)
    Temporal2Leading = 0,
    /// Temporal id 1
    Temporal1 = 1,
    /// Temporal id ≥ 2 coded after the temporal-1 picture (sequence-id bit 0)
    Temporal2Trailing = 2,
}

impl EnhancementSlot {
    pub const ALL: [EnhancementSlot; 3] = [
        EnhancementSlot::Temporal2Leading,
        EnhancementSlot::Temporal1,
        EnhancementSlot::Temporal2Trailing,
    ];

    /// Lane of a packet, or `None` for the base layer
    pub fn from_layer(temporal_id: u8, sequence_id: bool) -> Option<Self> {
        match temporal_id {
            0 => None,
            1 => Some(EnhancementSlot::Temporal1),
            _ if sequence_id => Some(EnhancementSlot::Temporal2Leading),
            _ => Some(EnhancementSlot::Temporal2Trailing),
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Delivery state of one enhancement lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerState {
    #[default]
    Pending,
    /// Every NAL unit arrived; the lane may be used as a reference
    Done,
    /// Nothing more of this lane is delivered for the access unit
    Abandoned,
}

/// Progress of one enhancement lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnhancementLayerStatus {
    /// NAL unit count advertised by the descriptor
    pub expected_nalu_count: u8,
    /// NAL units seen so far
    pub received_count: u8,
    pub state: LayerState,
}

impl EnhancementLayerStatus {
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == LayerState::Done
    }

    #[inline]
    pub fn is_abandoned(&self) -> bool {
        self.state == LayerState::Abandoned
    }

    /// Received at least one unit but reached neither terminal state
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.received_count > 0 && self.state == LayerState::Pending
    }

    #[inline]
    pub fn counts_match(&self) -> bool {
        self.received_count == self.expected_nalu_count
    }
}

/// Base-layer completeness of an access unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tl0State {
    /// No base-layer packet seen yet
    New,
    /// Some base-layer packets seen
    Collecting,
    /// Every base-layer packet seen
    Complete,
}

/// Result of recording a base-layer packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseUpdate {
    /// Already seen; state unchanged
    Duplicate,
    Recorded,
    /// This packet completed the access unit
    Completed,
}

/// Result of recording an enhancement packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementUpdate {
    /// Lane already abandoned; packet must be dropped
    Discarded,
    Recorded,
}

/// Tracking state of one TL0 access unit
#[derive(Clone, PartialEq, Eq)]
pub struct Tl0Info {
    base_layer_index: u8,
    span: SeqSpan,
    present: Vec<bool>,
    retries: Vec<u8>,
    received: usize,
    has_enhancement: bool,
    layers: [EnhancementLayerStatus; 3],
}

impl Tl0Info {
    /// Create the tracking state for an access unit
    pub fn new(base_layer_index: u8, span: SeqSpan) -> Result<Self, TrackerError> {
        check_span(span)?;
        let slots = span.len();
        let mut present = Vec::new();
        let mut retries = Vec::new();
        present
            .try_reserve_exact(slots)
            .and_then(|_| retries.try_reserve_exact(slots))
            .map_err(|_| TrackerError::Resource { slots })?;
        present.resize(slots, false);
        retries.resize(slots, 0);

        Ok(Tl0Info {
            base_layer_index,
            span,
            present,
            retries,
            received: 0,
            has_enhancement: false,
            layers: Default::default(),
        })
    }

    pub fn base_layer_index(&self) -> u8 {
        self.base_layer_index
    }

    pub fn span(&self) -> SeqSpan {
        self.span
    }

    /// Number of base-layer packets in the access unit
    pub fn expected_count(&self) -> usize {
        self.present.len()
    }

    /// Number of distinct base-layer packets seen
    pub fn received_count(&self) -> usize {
        self.received
    }

    pub fn state(&self) -> Tl0State {
        if self.received == self.present.len() {
            Tl0State::Complete
        } else if self.received == 0 {
            Tl0State::New
        } else {
            Tl0State::Collecting
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state() == Tl0State::Complete
    }

    /// Whether any enhancement packet referenced this access unit
    pub fn has_enhancement(&self) -> bool {
        self.has_enhancement
    }

    /// Presence of the base-layer packet at `slot`
    pub fn is_present(&self, slot: usize) -> bool {
        self.present.get(slot).copied().unwrap_or(false)
    }

    /// Slot of the highest base-layer packet seen so far
    pub fn last_present_slot(&self) -> Option<usize> {
        self.present.iter().rposition(|&p| p)
    }

    /// Sequence numbers not yet seen, in transmission order
    pub fn missing(&self) -> impl Iterator<Item = RtpSeq> + '_ {
        self.present
            .iter()
            .enumerate()
            .filter(|&(_, &p)| !p)
            .map(move |(slot, _)| self.span.seq_at(slot))
    }

    pub fn layer(&self, slot: EnhancementSlot) -> &EnhancementLayerStatus {
        &self.layers[slot.index()]
    }

    pub(crate) fn layer_mut(&mut self, slot: EnhancementSlot) -> &mut EnhancementLayerStatus {
        &mut self.layers[slot.index()]
    }

    pub(crate) fn retry_counter_mut(&mut self, slot: usize) -> Option<&mut u8> {
        self.retries.get_mut(slot)
    }

    /// Mark a lane ABANDONED unless it is already DONE
    ///
    /// Abandoning the temporal-1 lane also abandons the trailing temporal-2
    /// lane, which references it.
    pub fn abandon(&mut self, slot: EnhancementSlot) {
        let index = self.base_layer_index;
        let layer = self.layer_mut(slot);
        if layer.state == LayerState::Pending {
            layer.state = LayerState::Abandoned;
            debug!(
                "TL0 {}: {:?} abandoned ({}/{} NAL units)",
                index, slot, layer.received_count, layer.expected_nalu_count
            );
        }
        if slot == EnhancementSlot::Temporal1 {
            self.abandon(EnhancementSlot::Temporal2Trailing);
        }
    }

    /// Mark the base-layer packet `seq` as received
    pub fn record_base_packet(&mut self, seq: RtpSeq) -> Result<BaseUpdate, TrackerError> {
        let slot = self.span.slot_of(seq).ok_or(TrackerError::OutOfSpan {
            seq,
            span: self.span,
        })?;

        if self.present[slot] {
            return Ok(BaseUpdate::Duplicate);
        }

        self.present[slot] = true;
        self.received += 1;
        trace!(
            "TL0 {}: base {} ({}/{})",
            self.base_layer_index,
            seq,
            self.received,
            self.present.len()
        );

        if self.is_complete() {
            debug!("TL0 {} complete ({})", self.base_layer_index, self.span);
            Ok(BaseUpdate::Completed)
        } else {
            Ok(BaseUpdate::Recorded)
        }
    }

    /// Mark a lane DONE unless it is already ABANDONED
    pub fn complete(&mut self, slot: EnhancementSlot) {
        let index = self.base_layer_index;
        let layer = self.layer_mut(slot);
        if layer.state == LayerState::Pending {
            layer.state = LayerState::Done;
            trace!("TL0 {}: {:?} done", index, slot);
        }
    }

    /// Account for one enhancement packet on arrival
    ///
    /// Only the counters move here. Whether the lane ends DONE or ABANDONED
    /// is decided when its marker packet leaves the jitter buffer, so the
    /// outcome does not depend on arrival order.
    pub fn record_enhancement_packet(
        &mut self,
        temporal_id: u8,
        sequence_id: bool,
        nalu_count: u8,
    ) -> Result<EnhancementUpdate, TrackerError> {
        let slot =
            EnhancementSlot::from_layer(temporal_id, sequence_id).ok_or(TrackerError::NotEnhancement)?;
        self.has_enhancement = true;

        let layer = self.layer_mut(slot);
        if layer.is_abandoned() {
            return Ok(EnhancementUpdate::Discarded);
        }

        layer.expected_nalu_count = nalu_count;
        layer.received_count = layer.received_count.saturating_add(1);
        Ok(EnhancementUpdate::Recorded)
    }
}

impl fmt::Debug for Tl0Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tl0Info")
            .field("base_layer_index", &self.base_layer_index)
            .field("span", &self.span)
            .field("received", &self.received)
            .field("expected", &self.present.len())
            .field("has_enhancement", &self.has_enhancement)
            .field("layers", &self.layers)
            .finish()
    }
}

/// A base access unit never spans more packets than it has NAL units
fn check_span(span: SeqSpan) -> Result<(), TrackerError> {
    if span.len() > MAX_NALUS_PER_ACCESS_UNIT {
        return Err(TrackerError::SpanTooLong {
            span,
            max: MAX_NALUS_PER_ACCESS_UNIT,
        });
    }
    Ok(())
}

/// Outcome of [`Tl0Tracker::find_or_create`]
#[derive(Debug)]
pub struct Registered {
    /// Position of the entry in the registry
    pub position: usize,
    /// Whether the entry was created by this call
    pub created: bool,
    /// Stale entry evicted because its index was reused with another span
    pub evicted: Option<Tl0Info>,
}

/// Registry of in-flight TL0 access units in arrival order
#[derive(Debug, Default)]
pub struct Tl0Tracker {
    entries: VecDeque<Tl0Info>,
    evictions: u64,
}

impl Tl0Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate the entry for `(index, span)`, evicting a stale entry with the same index
    fn locate(&mut self, index: u8, span: SeqSpan) -> (Option<usize>, Option<Tl0Info>) {
        let Some(pos) = self
            .entries
            .iter()
            .position(|info| info.base_layer_index == index)
        else {
            return (None, None);
        };

        if self.entries[pos].span == span {
            return (Some(pos), None);
        }

        let stale = self.entries.remove(pos);
        self.evictions += 1;
        if let Some(stale) = &stale {
            debug!(
                "TL0 {}: cycle detected, evicting span {} for {}",
                index, stale.span, span
            );
        }
        (None, stale)
    }

    /// Position of the entry for `(index, span)`
    ///
    /// A different span under the same index evicts the stale entry.
    pub fn position(&mut self, index: u8, span: SeqSpan) -> Option<usize> {
        self.locate(index, span).0
    }

    /// Entry for `(index, span)`, if present
    pub fn find(&mut self, index: u8, span: SeqSpan) -> Option<&mut Tl0Info> {
        let pos = self.position(index, span)?;
        self.entries.get_mut(pos)
    }

    /// Entry for `(index, span)`, created at the back of the registry if missing
    pub fn find_or_create(&mut self, index: u8, span: SeqSpan) -> Result<Registered, TrackerError> {
        check_span(span)?;
        let (position, evicted) = self.locate(index, span);
        if let Some(position) = position {
            return Ok(Registered {
                position,
                created: false,
                evicted,
            });
        }

        let info = Tl0Info::new(index, span)?;
        self.entries
            .try_reserve(1)
            .map_err(|_| TrackerError::Resource { slots: span.len() })?;
        self.entries.push_back(info);
        trace!("TL0 {}: tracking span {}", index, span);

        Ok(Registered {
            position: self.entries.len() - 1,
            created: true,
            evicted,
        })
    }

    pub fn get(&self, position: usize) -> Option<&Tl0Info> {
        self.entries.get(position)
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut Tl0Info> {
        self.entries.get_mut(position)
    }

    /// Entry registered immediately before `position`
    pub fn previous(&mut self, position: usize) -> Option<&mut Tl0Info> {
        let prev = position.checked_sub(1)?;
        self.entries.get_mut(prev)
    }

    /// Drop every entry (decoder resynchronization)
    pub fn flush(&mut self) {
        if !self.entries.is_empty() {
            debug!("Flushing {} tracked access units", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &Tl0Info> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tl0Info> {
        self.entries.iter_mut()
    }

    /// Number of entries evicted by index reuse
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
