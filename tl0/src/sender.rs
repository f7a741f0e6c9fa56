//! Sender session
//!
//! Packetizes encoded pictures into TL0 aggregate packets, stamps them with
//! consecutive RTP sequence numbers and keeps a copy of everything sent so
//! that NACKed packets can be retransmitted.

use crate::error::SessionError;
use crate::rtp::{RtpHeader, RtpPacket};
use crate::transport::Transport;
use bytes::Bytes;
use std::io;
use tl0_protocol::nack::NackRecord;
use tl0_protocol::packetizer::{
    packetize, PacketSink, PacketizeReport, PacketizerState, Picture, PictureRole,
    Tl0IndexAllocator,
};
use tl0_protocol::sequence::{RtpSeq, SeqSpan};
use tracing::{debug, info, trace};

/// Dynamic payload type used when none is configured
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Sender configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderOptions {
    pub ssrc: u32,
    pub payload_type: u8,
    /// Largest RTP payload (descriptor plus NAL unit)
    pub max_packet_size: usize,
    /// Packets kept for retransmission
    pub retransmit_capacity: usize,
    /// Sequence number of the first packet
    pub initial_seq: u16,
}

impl Default for SenderOptions {
    fn default() -> Self {
        SenderOptions {
            ssrc: 0x5443_4C30,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            max_packet_size: 1200,
            retransmit_capacity: 1024,
            initial_seq: 0,
        }
    }
}

/// One encoded picture (Annex B access unit) from the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPicture {
    pub data: Bytes,
    /// RTP timestamp (90 kHz clock)
    pub timestamp: u32,
    pub is_idr: bool,
    pub temporal_id: u8,
}

impl EncodedPicture {
    pub fn role(&self) -> PictureRole {
        PictureRole::classify(self.is_idr, self.temporal_id)
    }
}

/// Sender statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub pictures_sent: u64,
    pub pictures_failed: u64,
    pub keyframes_sent: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// NAL units skipped by the packetizer
    pub nal_units_skipped: u64,
    pub nack_records: u64,
    pub packets_retransmitted: u64,
    /// NACKed packets no longer held
    pub retransmit_misses: u64,
    pub keyframe_requests: u64,
}

/// Circular store of recently sent packets
///
/// Indexed by sequence number; a slot is overwritten once the sequence space
/// has advanced by the capacity.
pub struct RetransmitBuffer {
    /// Buffer storage (circular)
    buffer: Vec<Option<RtpPacket>>,
    /// Mask for fast modulo operation (capacity - 1)
    mask: usize,
}

impl RetransmitBuffer {
    /// Create a buffer holding `capacity` packets (rounded up to a power of 2)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        RetransmitBuffer {
            buffer: vec![None; capacity],
            mask: capacity - 1,
        }
    }

    #[inline]
    fn index(&self, seq: RtpSeq) -> usize {
        (seq.as_raw() as usize) & self.mask
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn insert(&mut self, packet: RtpPacket) {
        let idx = self.index(packet.seq());
        self.buffer[idx] = Some(packet);
    }

    /// Packet sent with `seq`, if still held
    pub fn get(&self, seq: RtpSeq) -> Option<&RtpPacket> {
        self.buffer[self.index(seq)]
            .as_ref()
            .filter(|packet| packet.seq() == seq)
    }

    pub fn clear(&mut self) {
        for slot in &mut self.buffer {
            *slot = None;
        }
    }
}

/// Packet sink wiring the packetizer to the transport
struct RtpSink<'a, T> {
    transport: &'a mut T,
    retransmit: &'a mut RetransmitBuffer,
    stats: &'a mut SenderStats,
    next_seq: &'a mut RtpSeq,
    ssrc: u32,
    payload_type: u8,
    timestamp: u32,
}

impl<T: Transport> PacketSink for RtpSink<'_, T> {
    fn next_access_unit_span(&mut self, count: u16) -> SeqSpan {
        SeqSpan::starting_at(*self.next_seq, count)
    }

    fn send(&mut self, payload: Bytes, marker: bool) -> io::Result<()> {
        let mut header = RtpHeader::new(*self.next_seq, self.timestamp, self.ssrc, marker);
        header.payload_type = self.payload_type;
        let packet = RtpPacket::new(header, payload);

        self.transport.send(&packet)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += packet.payload.len() as u64;
        self.retransmit.insert(packet);
        self.next_seq.increment();
        Ok(())
    }

    fn keyframe_sent(&mut self, span: SeqSpan) {
        debug!("Keyframe sent in {}", span);
        self.stats.keyframes_sent += 1;
    }
}

/// Send path of one stream
pub struct SenderSession<T> {
    transport: T,
    options: SenderOptions,
    allocator: Tl0IndexAllocator,
    state: PacketizerState,
    next_seq: RtpSeq,
    retransmit: RetransmitBuffer,
    keyframe_requested: bool,
    stats: SenderStats,
}

impl<T: Transport> SenderSession<T> {
    pub fn new(transport: T, options: SenderOptions) -> Self {
        SenderSession {
            transport,
            allocator: Tl0IndexAllocator::new(),
            state: PacketizerState::new(),
            next_seq: RtpSeq::new(options.initial_seq),
            retransmit: RetransmitBuffer::new(options.retransmit_capacity),
            keyframe_requested: false,
            stats: SenderStats::default(),
            options,
        }
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sequence number of the next packet sent
    pub fn next_seq(&self) -> RtpSeq {
        self.next_seq
    }

    /// TL0 index of the most recent base picture
    pub fn current_index(&self) -> u8 {
        self.allocator.current()
    }

    /// Packetize and send one picture
    ///
    /// On error the TL0 index is not advanced; a failed base picture also
    /// drops the recorded span so that its enhancement pictures are refused.
    pub fn send_picture(&mut self, picture: &EncodedPicture) -> Result<PacketizeReport, SessionError> {
        let role = picture.role();
        let mut allocator = self.allocator.clone();
        let index = allocator.allocate(role);

        let mut sink = RtpSink {
            transport: &mut self.transport,
            retransmit: &mut self.retransmit,
            stats: &mut self.stats,
            next_seq: &mut self.next_seq,
            ssrc: self.options.ssrc,
            payload_type: self.options.payload_type,
            timestamp: picture.timestamp,
        };

        let result = packetize(
            &picture.data,
            Picture {
                role,
                base_layer_index: index,
            },
            self.options.max_packet_size,
            &mut self.state,
            &mut sink,
        );

        match result {
            Ok(report) => {
                self.allocator = allocator;
                self.stats.pictures_sent += 1;
                self.stats.nal_units_skipped += report.skipped as u64;
                trace!(
                    "TL0 {} ({:?}): {} packets in {}",
                    index,
                    role,
                    report.packets,
                    report.span
                );
                Ok(report)
            }
            Err(e) => {
                self.stats.pictures_failed += 1;
                if role.is_base() {
                    self.state.reset();
                }
                Err(e.into())
            }
        }
    }

    /// Retransmit every packet a NACK record reports lost
    ///
    /// Returns the number of packets resent.
    pub fn on_nack(&mut self, record: NackRecord) -> Result<usize, SessionError> {
        self.stats.nack_records += 1;
        let mut resent = 0;
        for seq in record.covered() {
            match self.retransmit.get(seq) {
                Some(packet) => {
                    trace!("Retransmitting {}", seq);
                    self.transport.send(packet)?;
                    self.stats.packets_retransmitted += 1;
                    resent += 1;
                }
                None => {
                    debug!("NACK for {} no longer held", seq);
                    self.stats.retransmit_misses += 1;
                }
            }
        }
        Ok(resent)
    }

    /// The receiver asked for a keyframe
    pub fn on_keyframe_request(&mut self) {
        info!("Keyframe requested");
        self.stats.keyframe_requests += 1;
        self.keyframe_requested = true;
    }

    /// Whether a keyframe was requested since the last call
    pub fn take_keyframe_request(&mut self) -> bool {
        std::mem::take(&mut self.keyframe_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use tl0_protocol::descriptor::AggregatePacket;
    use tl0_protocol::packetizer::PacketizeError;

    fn idr() -> EncodedPicture {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80]);
        data.extend_from_slice(&[0, 0, 1, 0x65, 0x88, 0x84, 0x21]);
        EncodedPicture {
            data: Bytes::from(data),
            timestamp: 0,
            is_idr: true,
            temporal_id: 0,
        }
    }

    fn enhancement(tid: u8) -> EncodedPicture {
        let data = vec![0, 0, 0, 1, 0x74, 0x80, 0x80, (tid << 5) | 0x07, 0x9A];
        EncodedPicture {
            data: Bytes::from(data),
            timestamp: 3000,
            is_idr: false,
            temporal_id: tid,
        }
    }

    fn session() -> SenderSession<MemoryTransport> {
        SenderSession::new(
            MemoryTransport::new(),
            SenderOptions {
                initial_seq: 100,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_sequence_numbers_and_span() {
        let mut tx = session();
        let report = tx.send_picture(&idr()).unwrap();
        assert_eq!(report.span, SeqSpan::new(RtpSeq::new(100), RtpSeq::new(102)));

        tx.send_picture(&enhancement(1)).unwrap();
        assert_eq!(tx.next_seq(), RtpSeq::new(104));

        let packets: Vec<RtpPacket> = tx.transport_mut().packets.drain(..).collect();
        let seqs: Vec<u16> = packets.iter().map(|p| p.seq().as_raw()).collect();
        assert_eq!(seqs, vec![100, 101, 102, 103]);
        assert!(packets[2].header.marker);
        assert!(packets[3].header.marker);
        assert_eq!(packets[3].header.timestamp, 3000);

        let last = AggregatePacket::parse(packets[3].payload.clone()).unwrap();
        assert_eq!(last.descriptor.span, report.span);
        assert_eq!(last.descriptor.base_layer_index, 0);
        assert!(last.descriptor.sequence_id);
        assert_eq!(tx.stats().keyframes_sent, 1);
    }

    #[test]
    fn test_nack_retransmits_held_packets() {
        let mut tx = session();
        tx.send_picture(&idr()).unwrap();
        tx.transport_mut().packets.clear();

        let mut record = NackRecord::new(RtpSeq::new(101));
        record.try_add(RtpSeq::new(102));
        record.try_add(RtpSeq::new(110));

        assert_eq!(tx.on_nack(record).unwrap(), 2);
        let resent: Vec<u16> = tx
            .transport()
            .packets
            .iter()
            .map(|p| p.seq().as_raw())
            .collect();
        assert_eq!(resent, vec![101, 102]);
        assert_eq!(tx.stats().retransmit_misses, 1);
    }

    #[test]
    fn test_retransmit_buffer_overwrites() {
        let mut buffer = RetransmitBuffer::new(3);
        assert_eq!(buffer.capacity(), 4);
        for seq in 0..6u16 {
            buffer.insert(RtpPacket::new(
                RtpHeader::new(RtpSeq::new(seq), 0, 1, false),
                Bytes::new(),
            ));
        }
        assert!(buffer.get(RtpSeq::new(1)).is_none());
        assert!(buffer.get(RtpSeq::new(5)).is_some());
        buffer.clear();
        assert!(buffer.get(RtpSeq::new(5)).is_none());
    }

    #[test]
    fn test_enhancement_without_base_refused() {
        let mut tx = session();
        let err = tx.send_picture(&enhancement(1)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Packetize(PacketizeError::MissingBaseSpan)
        ));
        assert_eq!(tx.next_seq(), RtpSeq::new(100));
        assert_eq!(tx.stats().pictures_failed, 1);
    }

    #[test]
    fn test_failed_base_keeps_index() {
        let mut tx = session();
        tx.send_picture(&idr()).unwrap();

        let mut base = idr();
        base.is_idr = false;
        base.data = Bytes::from_static(&[0, 0]);
        assert!(tx.send_picture(&base).is_err());
        assert_eq!(tx.current_index(), 0);
        assert!(tx.send_picture(&enhancement(2)).is_err());

        base.data = Bytes::from_static(&[0, 0, 1, 0x41, 0x9A]);
        tx.send_picture(&base).unwrap();
        assert_eq!(tx.current_index(), 1);
    }

    #[test]
    fn test_keyframe_request_flag() {
        let mut tx = session();
        assert!(!tx.take_keyframe_request());
        tx.on_keyframe_request();
        assert!(tx.take_keyframe_request());
        assert!(!tx.take_keyframe_request());
    }
}
