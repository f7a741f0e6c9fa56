use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io;
use tl0_protocol::descriptor::{AggregatePacket, Tl0Descriptor};
use tl0_protocol::nack::RetransmissionScheduler;
use tl0_protocol::nal::segment;
use tl0_protocol::packetizer::{packetize, PacketSink, PacketizerState, Picture, PictureRole};
use tl0_protocol::sequence::{RtpSeq, SeqSpan};
use tl0_protocol::svc::SvcHeader;
use tl0_protocol::tracker::Tl0Tracker;

struct NullSink {
    next: RtpSeq,
}

impl PacketSink for NullSink {
    fn next_access_unit_span(&mut self, count: u16) -> SeqSpan {
        let span = SeqSpan::starting_at(self.next, count);
        self.next += count;
        span
    }

    fn send(&mut self, packet: Bytes, _marker: bool) -> io::Result<()> {
        black_box(packet);
        Ok(())
    }
}

/// An access unit of `count` slices of `size` bytes each
fn access_unit(count: usize, size: usize) -> Vec<u8> {
    let mut au = Vec::with_capacity(count * (size + 4));
    for _ in 0..count {
        au.extend_from_slice(&[0, 0, 0, 1, 0x65]);
        au.extend(std::iter::repeat(0xA5).take(size - 1));
    }
    au
}

fn sample_descriptor() -> Tl0Descriptor {
    Tl0Descriptor {
        nal_ref_idc: 3,
        svc: SvcHeader {
            temporal_id: 2,
            output: true,
            ..Default::default()
        },
        enhancement_count: 4,
        sequence_id: true,
        base_layer_index: 17,
        span: SeqSpan::new(RtpSeq::new(1000), RtpSeq::new(1010)),
    }
}

fn bench_descriptor(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor");
    let desc = sample_descriptor();
    let bytes = desc.encode();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(&desc).encode()));
    });

    group.bench_function("decode", |b| {
        b.iter(|| black_box(Tl0Descriptor::decode(black_box(&bytes), 0).unwrap()));
    });

    let packet = AggregatePacket::new(desc, Bytes::from(vec![0x74u8; 1200])).to_bytes();
    group.bench_function("parse_aggregate", |b| {
        b.iter(|| black_box(AggregatePacket::parse(black_box(packet.clone())).unwrap()));
    });

    group.finish();
}

fn bench_segment(c: &mut Criterion) {
    let au = access_unit(16, 1000);
    let mut group = c.benchmark_group("nal");
    group.throughput(Throughput::Bytes(au.len() as u64));

    group.bench_function("segment_16x1000", |b| {
        b.iter(|| black_box(segment(black_box(&au)).count()));
    });

    group.finish();
}

fn bench_packetize(c: &mut Criterion) {
    let au = access_unit(16, 1000);
    let mut group = c.benchmark_group("packetizer");
    group.throughput(Throughput::Bytes(au.len() as u64));

    group.bench_function("base_picture_16x1000", |b| {
        let mut state = PacketizerState::new();
        let mut sink = NullSink {
            next: RtpSeq::new(0),
        };
        let picture = Picture {
            role: PictureRole::Base,
            base_layer_index: 1,
        };
        b.iter(|| {
            let report = packetize(black_box(&au), picture, 1400, &mut state, &mut sink).unwrap();
            black_box(report);
        });
    });

    group.finish();
}

fn bench_scheduler(c: &mut Criterion) {
    c.bench_function("nack_poll_64_entries", |b| {
        let mut tracker = Tl0Tracker::new();
        for index in 0..64u8 {
            let first = RtpSeq::new(index as u16 * 20);
            let span = SeqSpan::starting_at(first, 20);
            let pos = tracker.find_or_create(index, span).unwrap().position;
            let info = tracker.get_mut(pos).unwrap();
            for slot in (0..20).step_by(3) {
                info.record_base_packet(span.seq_at(slot)).unwrap();
            }
        }
        let scheduler = RetransmissionScheduler::default();
        b.iter(|| black_box(scheduler.poll(&mut tracker)));
    });
}

criterion_group!(
    benches,
    bench_descriptor,
    bench_segment,
    bench_packetize,
    bench_scheduler
);
criterion_main!(benches);
