//! Protocol scenario tests
//!
//! Worked examples of the descriptor codec, the tracker, the retransmission
//! scheduler and the delivery gate, driven through the public API only.

use bytes::Bytes;
use std::io;
use tl0_protocol::nack::batch;
use tl0_protocol::{
    packetize, CapacityError, DeliveryGate, EnhancementSlot, LayerState, PacketSink,
    PacketizeError, PacketizerState, Picture, PictureRole, RetransmissionScheduler, RtpSeq,
    SeqSpan, SvcHeader, Tl0Descriptor, Tl0State, Tl0Tracker, Verdict,
};

fn span(first: u16, last: u16) -> SeqSpan {
    SeqSpan::new(RtpSeq::new(first), RtpSeq::new(last))
}

fn descriptor(index: u8, span: SeqSpan, temporal_id: u8, sequence_id: bool, count: u8) -> Tl0Descriptor {
    Tl0Descriptor {
        nal_ref_idc: 2,
        svc: SvcHeader {
            temporal_id,
            ..Default::default()
        },
        enhancement_count: count,
        sequence_id,
        base_layer_index: index,
        span,
    }
}

#[test]
fn test_descriptor_scenario() {
    let desc = Tl0Descriptor {
        nal_ref_idc: 2,
        svc: SvcHeader {
            temporal_id: 2,
            idr: false,
            ..Default::default()
        },
        enhancement_count: 3,
        sequence_id: true,
        base_layer_index: 5,
        span: span(1000, 1010),
    };

    let raw = desc.encode();
    assert_eq!(raw[0], 0x5F);
    assert_eq!(raw[3] >> 5, 2);
    assert_eq!(raw[4], 0x83);
    assert_eq!(raw[5], 5);
    assert_eq!(&raw[6..], &[0x03, 0xE8, 0x03, 0xF2]);

    let decoded = Tl0Descriptor::decode(&raw, 0).unwrap();
    assert_eq!(decoded, desc);
    assert!(!decoded.svc.idr);
    assert_eq!(decoded.span.len(), 11);
}

#[test]
fn test_wraparound_span() {
    let s = span(65530, 3);
    assert_eq!(s.len(), 9);
    assert_eq!(s.slot_of(RtpSeq::new(1)), Some(7));
    assert_eq!(s.slot_of(RtpSeq::new(4)), None);
}

#[test]
fn test_gating_scenario() {
    let s = span(100, 103);
    let mut tracker = Tl0Tracker::new();
    let mut gate = DeliveryGate::new();
    let position = tracker.find_or_create(5, s).unwrap().position;

    // Temporal-1 picture: 4 of 4 NAL units, the last one carrying the marker
    let t1 = descriptor(5, s, 1, false, 4);
    for i in 0..4 {
        let marker = i == 3;
        tracker
            .get_mut(position)
            .unwrap()
            .record_enhancement_packet(1, false, 4)
            .unwrap();
        assert_eq!(gate.decide(&mut tracker, Some(&t1), marker), Verdict::Deliver);
    }
    assert!(tracker
        .get(position)
        .unwrap()
        .layer(EnhancementSlot::Temporal1)
        .is_done());

    // Trailing temporal-2 picture: 2 of 3 so far, no marker yet
    let t2 = descriptor(5, s, 2, false, 3);
    for _ in 0..2 {
        tracker
            .get_mut(position)
            .unwrap()
            .record_enhancement_packet(2, false, 3)
            .unwrap();
        assert_eq!(gate.decide(&mut tracker, Some(&t2), false), Verdict::Deliver);
    }
    let trailing = *tracker
        .get(position)
        .unwrap()
        .layer(EnhancementSlot::Temporal2Trailing);
    assert_eq!(trailing.state, LayerState::Pending);
    assert_eq!(trailing.received_count, 2);
}

#[test]
fn test_cycle_detection_scenario() {
    let mut tracker = Tl0Tracker::new();
    tracker.find_or_create(3, span(100, 110)).unwrap();

    let registered = tracker.find_or_create(3, span(200, 210)).unwrap();
    assert!(registered.created);
    assert!(registered.evicted.is_some());
    assert_eq!(tracker.len(), 1);

    let info = tracker.get(registered.position).unwrap();
    assert_eq!(info.expected_count(), 11);
    assert_eq!(info.state(), Tl0State::New);
}

#[test]
fn test_nack_batching_scenario() {
    let records = batch((0..20u16).map(|i| RtpSeq::new(1000) + i));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].covered().count(), 17);
    assert_eq!(records[1].covered().count(), 3);
}

#[test]
fn test_scheduler_requests_superseded_entry() {
    let mut tracker = Tl0Tracker::new();
    let first = tracker.find_or_create(1, span(0, 19)).unwrap().position;
    tracker.find_or_create(2, span(20, 20)).unwrap();
    assert_eq!(tracker.get(first).unwrap().state(), Tl0State::New);

    let records = RetransmissionScheduler::default().poll(&mut tracker);
    let covered: Vec<u16> = records
        .iter()
        .flat_map(|r| r.covered())
        .map(RtpSeq::as_raw)
        .collect();
    assert_eq!(covered, (0..20).collect::<Vec<u16>>());
    assert_eq!(records.len(), 2);
}

#[derive(Default)]
struct CountingSink {
    next: u16,
    sent: usize,
}

impl PacketSink for CountingSink {
    fn next_access_unit_span(&mut self, count: u16) -> SeqSpan {
        let span = SeqSpan::starting_at(RtpSeq::new(self.next), count);
        self.next = self.next.wrapping_add(count);
        span
    }

    fn send(&mut self, _packet: Bytes, _marker: bool) -> io::Result<()> {
        self.sent += 1;
        Ok(())
    }
}

#[test]
fn test_capacity_scenario() {
    let mut au = Vec::new();
    for _ in 0..129 {
        au.extend_from_slice(&[0, 0, 1, 0x41, 0x9A]);
    }

    let mut sink = CountingSink::default();
    let mut state = PacketizerState::new();
    let picture = Picture {
        role: PictureRole::Base,
        base_layer_index: 1,
    };
    let err = packetize(&au, picture, 1200, &mut state, &mut sink).unwrap_err();
    assert!(matches!(
        err,
        PacketizeError::Capacity(CapacityError::TooManyNalUnits { max: 128 })
    ));
    assert_eq!(sink.sent, 0);
    assert_eq!(state.current_span(), None);

    // 128 units fit
    let au = &au[..128 * 5];
    let report = packetize(au, picture, 1200, &mut state, &mut sink).unwrap();
    assert_eq!(report.packets, 128);
    assert_eq!(sink.sent, 128);
}
