//! Encoder-side Packetization
//!
//! Walks the NAL units of one encoded access unit and emits one aggregate
//! packet per unit: a 10-byte TL0 descriptor followed by the NAL unit bytes.
//! Enhancement pictures reuse the RTP sequence span of the base picture they
//! belong to so that receivers attribute them to the right TL0 access unit.

use crate::codec::{CapacityError, ParseError};
use crate::descriptor::{Tl0Descriptor, DESCRIPTOR_SIZE, MAX_ENHANCEMENT_COUNT};
use crate::nal::{nal_type, split_access_unit, NalUnit};
use crate::sequence::SeqSpan;
use crate::svc::{SvcHeader, SVC_HEADER_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Smallest buffer that can hold a start code and a NAL header
const MIN_ACCESS_UNIT_SIZE: usize = 4;

/// Sequence indicator value meaning "no enhancement picture since the base"
const INDICATOR_RESET: i16 = -2;

/// Packetization errors
#[derive(Error, Debug)]
pub enum PacketizeError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Capacity exceeded: {0}")]
    Capacity(#[from] CapacityError),

    #[error("Enhancement picture without a preceding base picture")]
    MissingBaseSpan,

    #[error("Packet sink error: {0}")]
    Io(#[from] io::Error),
}

/// Coding role of a picture within its TL0 period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureRole {
    /// Instantaneous decoder refresh; restarts the TL0 index at 0
    Idr,
    /// Temporal layer 0 picture
    Base,
    /// Temporal layer 1 or above
    Enhancement,
}

impl PictureRole {
    /// Classify a picture from the encoder's layer information
    pub fn classify(is_idr: bool, temporal_id: u8) -> Self {
        if is_idr {
            PictureRole::Idr
        } else if temporal_id == 0 {
            PictureRole::Base
        } else {
            PictureRole::Enhancement
        }
    }

    /// IDR and base pictures open a new TL0 access unit
    #[inline]
    pub fn is_base(self) -> bool {
        !matches!(self, PictureRole::Enhancement)
    }
}

/// One picture handed to the packetizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Picture {
    pub role: PictureRole,
    /// TL0 picture index shared by every unit of the picture
    pub base_layer_index: u8,
}

/// Encoder-side state carried between access units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketizerState {
    span: Option<SeqSpan>,
    sequence_indicator: i16,
}

impl Default for PacketizerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketizerState {
    pub fn new() -> Self {
        PacketizerState {
            span: None,
            sequence_indicator: INDICATOR_RESET,
        }
    }

    /// Span of the most recent base picture
    pub fn current_span(&self) -> Option<SeqSpan> {
        self.span
    }

    /// Forget the recorded span (e.g. after an encoder restart)
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn begin_base(&mut self, span: SeqSpan) {
        self.span = Some(span);
        self.sequence_indicator = INDICATOR_RESET;
    }

    /// Advance the indicator for an enhancement picture and return its sequence-id bit
    fn begin_enhancement(&mut self) -> bool {
        self.sequence_indicator = self.sequence_indicator.saturating_add(1);
        self.sequence_indicator == INDICATOR_RESET + 1
    }
}

/// Destination of packetized output
pub trait PacketSink {
    /// Reserve `count` consecutive RTP sequence numbers for a base access unit
    fn next_access_unit_span(&mut self, count: u16) -> SeqSpan;

    /// Send one RTP payload; `marker` is set on the last packet of the access unit
    fn send(&mut self, packet: Bytes, marker: bool) -> io::Result<()>;

    /// Called once after the last packet of an IDR picture has been sent
    fn keyframe_sent(&mut self, _span: SeqSpan) {}
}

/// Outcome of packetizing one access unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketizeReport {
    /// Packets handed to the sink
    pub packets: usize,
    /// NAL units dropped because they failed to parse
    pub skipped: usize,
    /// Span advertised in every descriptor
    pub span: SeqSpan,
    /// Sequence-id bit advertised in every descriptor
    pub sequence_id: bool,
}

/// A NAL unit ready to be wrapped
struct Entry {
    unit: NalUnit,
    svc: SvcHeader,
    nal_ref_idc: u8,
}

/// Parse NAL types and SVC headers, propagating prefix headers forward
fn classify_units(buf: &[u8], units: Vec<Result<NalUnit, ParseError>>) -> (Vec<Entry>, usize) {
    let mut entries = Vec::with_capacity(units.len());
    let mut skipped = 0;
    let mut prefix: Option<SvcHeader> = None;

    for unit in units {
        let unit = match unit {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Skipping NAL unit: {}", e);
                skipped += 1;
                continue;
            }
        };

        let mut svc = prefix.take().unwrap_or_default();
        if unit.nal_type() == nal_type::IDR {
            svc.idr = true;
        }
        if unit.header.has_svc_extension() {
            match SvcHeader::decode(buf, unit.payload_offset + 1) {
                Ok(parsed) if unit.payload_len > SVC_HEADER_SIZE => svc = parsed,
                Ok(_) => {
                    warn!("Skipping NAL type {}: truncated SVC header", unit.nal_type());
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Skipping NAL type {}: {}", unit.nal_type(), e);
                    skipped += 1;
                    continue;
                }
            }
            if unit.nal_type() == nal_type::PREFIX {
                prefix = Some(svc);
            }
        }

        entries.push(Entry {
            unit,
            svc,
            nal_ref_idc: unit.header.effective_nal_ref_idc(),
        });
    }

    (entries, skipped)
}

/// Packetize one access unit into the sink
///
/// Parse, capacity and span errors are detected before the first packet is
/// handed to the sink, so none is sent. A sink I/O error stops the loop
/// where it occurs: the packets before it have already been sent.
pub fn packetize<S: PacketSink + ?Sized>(
    access_unit: &[u8],
    picture: Picture,
    max_packet_size: usize,
    state: &mut PacketizerState,
    sink: &mut S,
) -> Result<PacketizeReport, PacketizeError> {
    if access_unit.len() < MIN_ACCESS_UNIT_SIZE {
        return Err(ParseError::Truncated {
            needed: MIN_ACCESS_UNIT_SIZE,
            available: access_unit.len(),
        }
        .into());
    }

    let units = split_access_unit(access_unit)?;
    let (entries, skipped) = classify_units(access_unit, units);
    if entries.is_empty() {
        return Err(ParseError::EmptyNalUnit.into());
    }

    for entry in &entries {
        let size = DESCRIPTOR_SIZE + entry.unit.payload_len;
        if size > max_packet_size {
            return Err(CapacityError::PacketTooLarge {
                size,
                max: max_packet_size,
            }
            .into());
        }
    }

    let count = entries.len();
    if !picture.role.is_base() && count > MAX_ENHANCEMENT_COUNT as usize {
        return Err(CapacityError::EnhancementCountOverflow(count).into());
    }

    let (span, sequence_id) = if picture.role.is_base() {
        let span = sink.next_access_unit_span(count as u16);
        state.begin_base(span);
        debug!(
            "TL0 {} ({:?}): new span {} for {} NAL units",
            picture.base_layer_index, picture.role, span, count
        );
        (span, false)
    } else {
        let span = state.span.ok_or(PacketizeError::MissingBaseSpan)?;
        (span, state.begin_enhancement())
    };

    let enhancement_count = count.min(MAX_ENHANCEMENT_COUNT as usize) as u8;
    for (i, entry) in entries.iter().enumerate() {
        let descriptor = Tl0Descriptor {
            nal_ref_idc: entry.nal_ref_idc,
            svc: entry.svc,
            enhancement_count,
            sequence_id,
            base_layer_index: picture.base_layer_index,
            span,
        };

        let nal = entry.unit.payload(access_unit);
        let mut buf = BytesMut::with_capacity(DESCRIPTOR_SIZE + nal.len());
        descriptor.to_bytes(&mut buf);
        buf.put_slice(nal);

        let marker = i + 1 == count;
        trace!(
            "TL0 {} NAL type {} tid {} ({} bytes){}",
            picture.base_layer_index,
            entry.unit.nal_type(),
            entry.svc.temporal_id,
            buf.len(),
            if marker { " [marker]" } else { "" }
        );
        sink.send(buf.freeze(), marker)?;
    }

    if picture.role == PictureRole::Idr {
        sink.keyframe_sent(span);
    }

    Ok(PacketizeReport {
        packets: count,
        skipped,
        span,
        sequence_id,
    })
}

/// Assigns TL0 picture indices to outgoing pictures
///
/// IDR pictures restart at 0. Each base picture advances the index, wrapping
/// from 255 to 1 so that 0 only ever marks a keyframe. Enhancement pictures
/// share the index of their base picture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tl0IndexAllocator {
    current: u8,
}

impl Tl0IndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the most recent base picture
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Allocate the index for the next picture
    pub fn allocate(&mut self, role: PictureRole) -> u8 {
        self.current = match role {
            PictureRole::Idr => 0,
            PictureRole::Base => match self.current.wrapping_add(1) {
                0 => 1,
                next => next,
            },
            PictureRole::Enhancement => self.current,
        };
        self.current
    }
}
