//! 명령 블록 파서 / 상태 머신 벤치마크

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use swlink::header::PacketHeader;
use swlink::parser::{self, tags};
use swlink::{Config, Connection, Flags};

fn bus_block(tag: [u8; 4], input: u16) -> Vec<u8> {
    let mut block = vec![0, 12, 0, 0];
    block.extend_from_slice(&tag);
    block.extend_from_slice(&[0, 0]);
    block.extend_from_slice(&input.to_be_bytes());
    block
}

fn aux_block(bus: u8, input: u16) -> Vec<u8> {
    let mut block = vec![0, 16, 0, 0];
    block.extend_from_slice(&tags::AUX_SOURCE);
    block.extend_from_slice(&[0, bus, 0]);
    block.extend_from_slice(&input.to_be_bytes());
    block.extend_from_slice(&[0, 0, 0]);
    block
}

fn payload_with_blocks(count: usize) -> Vec<u8> {
    let mut payload = aux_block(0, 1001);
    for i in 1..count {
        let tag = if i % 2 == 0 {
            tags::PROGRAM_INPUT
        } else {
            tags::PREVIEW_INPUT
        };
        payload.extend(bus_block(tag, i as u16));
    }
    payload
}

fn frame(flags: Flags, session_id: u16, packet_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut header = PacketHeader::new(flags, payload.len() as u16, session_id);
    header.packet_id = packet_id;
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(payload);
    frame
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for count in [1, 10, 50, 99] {
        let payload = payload_with_blocks(count);
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("blocks", count), &payload, |b, payload| {
            b.iter(|| parser::parse(black_box(payload)))
        });
    }

    group.finish();
}

fn bench_initial_sync(c: &mut Criterion) {
    let session_id = 0x8001;
    let mut hello_payload = [0u8; 8];
    hello_payload[0] = 0x02;
    let hello = frame(Flags::HELLO, session_id, 0, &hello_payload);

    let mut frames: Vec<Vec<u8>> = (1..30u16)
        .map(|id| {
            frame(
                Flags::ACK_REQUEST,
                session_id,
                id,
                &bus_block(tags::PROGRAM_INPUT, id),
            )
        })
        .collect();
    frames.push(frame(Flags::ACK_REQUEST, session_id, 30, &[]));

    c.bench_function("initial_sync_30_frames", |b| {
        b.iter(|| {
            let mut connection = Connection::new(&Config::default());
            connection.connect();
            connection.handle_datagram(&hello);
            for frame in &frames {
                black_box(connection.handle_datagram(frame));
            }
            assert!(connection.is_ready());
        })
    });
}

criterion_group!(benches, bench_parse, bench_initial_sync);
criterion_main!(benches);
