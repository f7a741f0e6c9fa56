//! End-to-end tests
//!
//! A sender session and a receiver session connected through in-memory
//! transports, with loss injected on the way.

use bytes::Bytes;
use std::collections::HashSet;
use tl0::{
    EncodedPicture, MemoryTransport, ReceiverOptions, ReceiverSession, RtpPacket, RtpSeq,
    SenderOptions, SenderSession,
};
use tl0_protocol::split_access_unit;

type Sender = SenderSession<MemoryTransport>;
type Receiver = ReceiverSession<MemoryTransport>;

/// Temporal id of each picture in a TL0 period
const PERIOD: [u8; 4] = [0, 2, 1, 2];

fn start_code(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[0, 0, 0, 1]);
}

fn svc(temporal_id: u8, idr: bool) -> [u8; 3] {
    tl0_protocol::SvcHeader {
        idr,
        temporal_id,
        output: true,
        ..Default::default()
    }
    .encode()
}

fn picture(frame: usize, idr: bool) -> EncodedPicture {
    let temporal_id = PERIOD[frame % PERIOD.len()];
    let fill = 0x80 | (frame & 0x3F) as u8;
    let mut data = Vec::new();

    if temporal_id == 0 {
        if idr {
            start_code(&mut data);
            data.extend_from_slice(&[0x67, 0x42, 0xC0, 0x1E]);
            start_code(&mut data);
            data.extend_from_slice(&[0x68, 0xCE, 0x3C, 0x80]);
        }
        start_code(&mut data);
        data.push(0x6E);
        data.extend_from_slice(&svc(0, idr));
        start_code(&mut data);
        data.push(if idr { 0x65 } else { 0x41 });
        data.extend_from_slice(&[fill; 24]);
    } else {
        for _ in 0..2 {
            start_code(&mut data);
            data.push(0x54);
            data.extend_from_slice(&svc(temporal_id, false));
            data.extend_from_slice(&[fill; 16]);
        }
    }

    EncodedPicture {
        data: Bytes::from(data),
        timestamp: frame as u32 * 3000,
        is_idr: temporal_id == 0 && idr,
        temporal_id,
    }
}

fn sessions() -> (Sender, Receiver) {
    (
        SenderSession::new(MemoryTransport::new(), SenderOptions::default()),
        ReceiverSession::new(MemoryTransport::new(), ReceiverOptions::default()),
    )
}

/// Deliver queued packets, answering feedback after each one
fn pump(sender: &mut Sender, receiver: &mut Receiver, mut pass: impl FnMut(&RtpPacket) -> bool) {
    while let Some(packet) = sender.transport_mut().packets.pop_front() {
        if !pass(&packet) {
            continue;
        }
        let packet = RtpPacket::from_bytes(packet.to_bytes()).unwrap();
        receiver.handle_packet(packet).unwrap();

        while let Some(record) = receiver.transport_mut().nacks.pop_front() {
            sender.on_nack(record).unwrap();
        }
        if std::mem::take(&mut receiver.transport_mut().keyframe_requests) > 0 {
            sender.on_keyframe_request();
        }
    }
}

fn drain(receiver: &mut Receiver) -> Vec<Bytes> {
    std::iter::from_fn(|| receiver.pop_access_unit()).collect()
}

#[test]
fn test_lossless_stream() {
    let (mut tx, mut rx) = sessions();
    let mut units = Vec::new();

    for frame in 0..12 {
        tx.send_picture(&picture(frame, frame == 0)).unwrap();
        pump(&mut tx, &mut rx, |_| true);
        units.extend(drain(&mut rx));
    }

    assert_eq!(units.len(), 12);
    for unit in &units {
        let nals = split_access_unit(unit).unwrap();
        assert!(nals.iter().all(Result::is_ok));
    }
    // The IDR access unit carries SPS, PPS, prefix and slice
    assert_eq!(split_access_unit(&units[0]).unwrap().len(), 4);

    let stats = rx.stats();
    assert_eq!(stats.tl0_completed, 3);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.nack_records, 0);
    assert_eq!(tx.stats().packets_sent, 4 + 2 * 2 + 9 * 2);
}

#[test]
fn test_lost_base_packet_is_retransmitted() {
    let (mut tx, mut rx) = sessions();

    // Drop the first transmission of the PPS (second packet of the IDR)
    let mut dropped = false;
    tx.send_picture(&picture(0, true)).unwrap();
    pump(&mut tx, &mut rx, |p| {
        if p.seq() == RtpSeq::new(1) && !dropped {
            dropped = true;
            return false;
        }
        true
    });

    assert!(dropped);
    assert_eq!(tx.stats().packets_retransmitted, 1);
    assert_eq!(rx.stats().nack_records, 1);
    assert_eq!(rx.stats().tl0_completed, 1);

    let units = drain(&mut rx);
    assert_eq!(units.len(), 1);
    assert_eq!(split_access_unit(&units[0]).unwrap().len(), 4);
}

#[test]
fn test_periodic_loss_recovers_every_base_picture() {
    let (mut tx, mut rx) = sessions();
    let mut count = 0u64;
    let mut lost = HashSet::new();

    for frame in 0..40 {
        tx.send_picture(&picture(frame, frame == 0)).unwrap();
        pump(&mut tx, &mut rx, |p| {
            if lost.remove(&p.seq()) {
                return true;
            }
            count += 1;
            if count % 7 == 0 {
                lost.insert(p.seq());
                return false;
            }
            true
        });
    }

    let stats = rx.stats().clone();
    assert_eq!(stats.tl0_completed, 10);
    assert!(stats.nack_records > 0);
    assert!(tx.stats().packets_retransmitted > 0);
    assert!(stats.access_units > 0);
    for unit in drain(&mut rx) {
        assert!(split_access_unit(&unit).unwrap().iter().all(Result::is_ok));
    }
}

#[test]
fn test_keyframe_request_handshake() {
    let (mut tx, mut rx) = sessions();
    for frame in 0..5 {
        tx.send_picture(&picture(frame, frame == 0)).unwrap();
        pump(&mut tx, &mut rx, |_| true);
    }
    assert_eq!(drain(&mut rx).len(), 5);

    // Decoder lost sync: everything up to the next IDR picture is dropped
    rx.report_decode_error().unwrap();
    assert!(rx.keyframe_pending());
    assert_eq!(std::mem::take(&mut rx.transport_mut().keyframe_requests), 1);
    tx.on_keyframe_request();

    tx.send_picture(&picture(5, false)).unwrap();
    pump(&mut tx, &mut rx, |_| true);
    assert_eq!(rx.stats().keyframe_wait_drops, 2);
    assert!(rx.tracker().is_empty());
    assert!(drain(&mut rx).is_empty());

    // Skip the rest of the period, then answer with an IDR picture
    assert!(tx.take_keyframe_request());
    tx.send_picture(&picture(8, true)).unwrap();
    assert_eq!(tx.current_index(), 0);
    pump(&mut tx, &mut rx, |_| true);

    assert!(!rx.keyframe_pending());
    let units = drain(&mut rx);
    assert_eq!(units.len(), 1);
    assert_eq!(split_access_unit(&units[0]).unwrap().len(), 4);
}

#[test]
fn test_ssrc_change_restarts_tracking() {
    let (mut tx, mut rx) = sessions();
    tx.send_picture(&picture(0, true)).unwrap();
    pump(&mut tx, &mut rx, |_| true);
    assert_eq!(drain(&mut rx).len(), 1);

    let mut other = SenderSession::new(
        MemoryTransport::new(),
        SenderOptions {
            ssrc: 0xABCD,
            initial_seq: 5000,
            ..Default::default()
        },
    );
    other.send_picture(&picture(0, true)).unwrap();
    pump(&mut other, &mut rx, |_| true);

    assert_eq!(rx.stats().ssrc_changes, 1);
    assert_eq!(rx.tracker().len(), 1);
    assert_eq!(drain(&mut rx).len(), 1);
}
