//! Receiver session
//!
//! Runs the receive path of one video stream:
//!
//! ```text
//! transport -> tracker -> NACK scheduler -> jitter buffer -> gate -> assembler
//! ```
//!
//! Every incoming packet first updates the TL0 tracker; missing base-layer
//! packets are requested through the transport; the packet is then queued in
//! the jitter buffer and whatever the buffer releases passes the delivery
//! gate on its way to the decoder input.

use crate::assembler::{AccessUnitAssembler, AssembleError, DecoderInput, DEFAULT_MAX_ACCESS_UNIT_SIZE};
use crate::error::SessionError;
use crate::jitter::{JitterBuffer, ReorderBuffer};
use crate::rtp::RtpPacket;
use crate::transport::Transport;
use bytes::Bytes;
use std::collections::VecDeque;
use tl0_protocol::descriptor::{is_aggregate, AggregatePacket, Tl0Descriptor};
use tl0_protocol::gate::{DeliveryGate, Verdict};
use tl0_protocol::nack::{RetransmissionScheduler, MAX_NACK_TOLERANCE};
use tl0_protocol::tracker::{BaseUpdate, EnhancementSlot, EnhancementUpdate, Tl0Tracker, TrackerError};
use tracing::{debug, info, trace, warn};

/// Packets dropped while a keyframe request is outstanding before it is resent
pub const FIR_PACKET_TOLERANCE: u32 = 50;

/// Receiver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// Packets without the keyframe answer tolerated before the FIR is resent
    pub fir_packet_tolerance: u32,
    /// Polls between two NACKs for the same packet
    pub nack_tolerance: u8,
    /// Jitter buffer window in packets
    pub jitter_capacity: usize,
    /// Packets held behind a gap before the jitter buffer skips it
    pub jitter_depth: usize,
    /// Largest access unit assembled
    pub max_access_unit_size: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        ReceiverOptions {
            fir_packet_tolerance: FIR_PACKET_TOLERANCE,
            nack_tolerance: MAX_NACK_TOLERANCE,
            jitter_capacity: 512,
            jitter_depth: 32,
            max_access_unit_size: DEFAULT_MAX_ACCESS_UNIT_SIZE,
        }
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Total packets handed to the session
    pub packets_received: u64,
    /// Total payload bytes handed to the session
    pub bytes_received: u64,
    /// Packets with an empty payload
    pub empty_packets: u64,
    /// Packets whose descriptor failed to parse
    pub parse_errors: u64,
    /// Base packets outside their advertised span, or spans longer than an access unit
    pub protocol_errors: u64,
    /// SSRC changes seen
    pub ssrc_changes: u64,
    /// Base packets seen more than once
    pub duplicates: u64,
    /// TL0 access units whose base layer completed
    pub tl0_completed: u64,
    /// Enhancement packets accounted for
    pub enhancement_packets: u64,
    /// Enhancement packets dropped because their lane was abandoned
    pub enhancement_discarded: u64,
    /// Tracker entries evicted by TL0 index reuse
    pub evictions: u64,
    /// NACK records sent
    pub nack_records: u64,
    /// Keyframe requests sent
    pub keyframe_requests: u64,
    /// Packets dropped while waiting for the keyframe answer
    pub keyframe_wait_drops: u64,
    /// Packets refused by the jitter buffer
    pub jitter_errors: u64,
    /// Packets handed to the decoder input
    pub delivered: u64,
    /// Packets dropped by the delivery gate
    pub skipped: u64,
    /// Partial access units discarded on a gate flush verdict
    pub gate_flushes: u64,
    /// Complete access units produced
    pub access_units: u64,
    /// Access units dropped for lack of a keyframe
    pub missing_keyframe: u64,
    /// Other decoder input errors
    pub assemble_errors: u64,
}

/// Receive path of one stream
pub struct ReceiverSession<T, J = ReorderBuffer, D = AccessUnitAssembler> {
    transport: T,
    jitter: J,
    decoder: D,
    tracker: Tl0Tracker,
    scheduler: RetransmissionScheduler,
    gate: DeliveryGate,
    options: ReceiverOptions,
    ssrc: Option<u32>,
    keyframe_pending: bool,
    keyframe_wait: u32,
    ready: VecDeque<Bytes>,
    stats: ReceiverStats,
}

impl<T: Transport> ReceiverSession<T> {
    /// Create a session with the default jitter buffer and assembler
    pub fn new(transport: T, options: ReceiverOptions) -> Self {
        let jitter = ReorderBuffer::new(options.jitter_capacity, options.jitter_depth);
        let decoder = AccessUnitAssembler::new(options.max_access_unit_size);
        Self::with_parts(transport, jitter, decoder, options)
    }
}

impl<T: Transport, J: JitterBuffer, D: DecoderInput> ReceiverSession<T, J, D> {
    /// Create a session from explicit collaborators
    pub fn with_parts(transport: T, jitter: J, decoder: D, options: ReceiverOptions) -> Self {
        ReceiverSession {
            transport,
            jitter,
            decoder,
            tracker: Tl0Tracker::new(),
            scheduler: RetransmissionScheduler::new(options.nack_tolerance),
            gate: DeliveryGate::new(),
            options,
            ssrc: None,
            keyframe_pending: false,
            keyframe_wait: 0,
            ready: VecDeque::new(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn tracker(&self) -> &Tl0Tracker {
        &self.tracker
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether a keyframe request is waiting for its answer
    pub fn keyframe_pending(&self) -> bool {
        self.keyframe_pending
    }

    /// Next complete access unit, in decode order
    pub fn pop_access_unit(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    /// Number of complete access units waiting
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Ask the sender for a keyframe and drop everything until it arrives
    pub fn request_keyframe(&mut self) -> Result<(), SessionError> {
        info!("Requesting keyframe");
        self.transport.send_keyframe_request()?;
        self.keyframe_pending = true;
        self.keyframe_wait = 0;
        self.stats.keyframe_requests += 1;
        Ok(())
    }

    /// The decoder failed on an access unit: resynchronize on a keyframe
    pub fn report_decode_error(&mut self) -> Result<(), SessionError> {
        self.decoder.resync();
        self.request_keyframe()
    }

    /// Drop all tracking and buffered state
    fn resynchronize(&mut self) {
        self.tracker.flush();
        self.jitter.flush();
        self.decoder.flush();
    }

    /// Process one packet from the transport
    pub fn handle_packet(&mut self, packet: RtpPacket) -> Result<(), SessionError> {
        if packet.payload.is_empty() {
            self.stats.empty_packets += 1;
            return Ok(());
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += packet.payload.len() as u64;

        let ssrc = packet.header.ssrc;
        if self.ssrc != Some(ssrc) {
            if let Some(previous) = self.ssrc {
                info!("SSRC changed {:#x} -> {:#x}", previous, ssrc);
                self.stats.ssrc_changes += 1;
                self.resynchronize();
            }
            self.ssrc = Some(ssrc);
        }

        if !is_aggregate(&packet.payload) {
            self.enqueue(packet);
            return self.drain();
        }

        let descriptor = match AggregatePacket::parse(packet.payload.clone()) {
            Ok(aggregate) => aggregate.descriptor,
            Err(e) => {
                warn!("Dropping packet {}: {}", packet.seq(), e);
                self.stats.parse_errors += 1;
                return Ok(());
            }
        };

        if self.keyframe_pending {
            if descriptor.base_layer_index != 0 {
                self.resynchronize();
                self.stats.keyframe_wait_drops += 1;
                self.keyframe_wait += 1;
                if self.keyframe_wait >= self.options.fir_packet_tolerance {
                    debug!("No keyframe after {} packets, resending request", self.keyframe_wait);
                    self.request_keyframe()?;
                }
                return Ok(());
            }

            debug!("Keyframe answer received at {}", packet.seq());
            self.resynchronize();
            self.keyframe_pending = false;
            self.keyframe_wait = 0;
        }

        match self.track(&packet, &descriptor)? {
            Tracked::Queue => {
                self.request_missing()?;
                self.enqueue(packet);
            }
            Tracked::Duplicate => self.request_missing()?,
            Tracked::Drop => return Ok(()),
        }

        self.drain()
    }

    /// Update the tracker for one packet
    fn track(&mut self, packet: &RtpPacket, descriptor: &Tl0Descriptor) -> Result<Tracked, SessionError> {
        let registered = match self
            .tracker
            .find_or_create(descriptor.base_layer_index, descriptor.span)
        {
            Ok(registered) => registered,
            Err(e @ TrackerError::SpanTooLong { .. }) => {
                warn!("Dropping packet {}: {}", packet.seq(), e);
                self.stats.protocol_errors += 1;
                return Ok(Tracked::Drop);
            }
            Err(e) => return Err(e.into()),
        };
        if registered.evicted.is_some() {
            self.stats.evictions += 1;
        }

        let Some(info) = self.tracker.get_mut(registered.position) else {
            return Ok(Tracked::Drop);
        };

        if EnhancementSlot::from_layer(descriptor.temporal_id(), descriptor.sequence_id).is_some() {
            let update = info.record_enhancement_packet(
                descriptor.temporal_id(),
                descriptor.sequence_id,
                descriptor.enhancement_count,
            )?;
            return Ok(match update {
                EnhancementUpdate::Discarded => {
                    trace!("Dropping {}: enhancement lane abandoned", packet.seq());
                    self.stats.enhancement_discarded += 1;
                    Tracked::Drop
                }
                EnhancementUpdate::Recorded => {
                    self.stats.enhancement_packets += 1;
                    Tracked::Queue
                }
            });
        }

        match info.record_base_packet(packet.seq()) {
            Ok(BaseUpdate::Duplicate) => {
                self.stats.duplicates += 1;
                Ok(Tracked::Duplicate)
            }
            Ok(BaseUpdate::Recorded) => Ok(Tracked::Queue),
            Ok(BaseUpdate::Completed) => {
                self.stats.tl0_completed += 1;
                Ok(Tracked::Queue)
            }
            Err(e @ TrackerError::OutOfSpan { .. }) => {
                warn!("Dropping packet: {}", e);
                self.stats.protocol_errors += 1;
                Ok(Tracked::Drop)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send the NACK records the scheduler considers due
    fn request_missing(&mut self) -> Result<(), SessionError> {
        for record in self.scheduler.poll(&mut self.tracker) {
            trace!("NACK {:?}", record);
            self.transport.send_nack(record)?;
            self.stats.nack_records += 1;
        }
        Ok(())
    }

    fn enqueue(&mut self, packet: RtpPacket) {
        if let Err(e) = self.jitter.put(packet) {
            debug!("Jitter buffer refused packet: {}", e);
            self.stats.jitter_errors += 1;
        }
    }

    /// Pass every packet the jitter buffer releases through the gate
    fn drain(&mut self) -> Result<(), SessionError> {
        while let Some(packet) = self.jitter.get() {
            let descriptor = if is_aggregate(&packet.payload) {
                Tl0Descriptor::decode(&packet.payload, 0).ok()
            } else {
                None
            };

            match self
                .gate
                .decide(&mut self.tracker, descriptor.as_ref(), packet.header.marker)
            {
                Verdict::Skip => {
                    trace!("Gate skipped {}", packet.seq());
                    self.stats.skipped += 1;
                    self.decoder.flush();
                    continue;
                }
                Verdict::FlushThenDeliver => {
                    self.stats.gate_flushes += 1;
                    self.decoder.flush();
                }
                Verdict::Deliver => {}
            }

            self.deliver(&packet)?;
        }
        Ok(())
    }

    fn deliver(&mut self, packet: &RtpPacket) -> Result<(), SessionError> {
        self.stats.delivered += 1;
        match self.decoder.accept(&packet.header, &packet.payload) {
            Ok(Some(access_unit)) => {
                self.stats.access_units += 1;
                self.ready.push_back(access_unit);
            }
            Ok(None) => {}
            Err(AssembleError::MissingKeyframe) => {
                self.stats.missing_keyframe += 1;
                if !self.keyframe_pending {
                    self.request_keyframe()?;
                }
            }
            Err(e) => {
                warn!("Decoder input rejected {}: {}", packet.seq(), e);
                self.stats.assemble_errors += 1;
            }
        }
        Ok(())
    }
}

/// What to do with a packet after tracking
enum Tracked {
    Queue,
    /// Base packet already seen: not queued again
    Duplicate,
    Drop,
}
