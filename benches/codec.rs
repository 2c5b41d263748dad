use std::io::Cursor;
use std::time::Duration;

use cnclink::protocol::{DEFAULT_ADDRESS, FrameScanner, crc8, decode, encode, encode_into};
use cnclink::transport::{DEFAULT_CHUNK_SIZE, chunk, serialize_lines};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");

    for size in [16usize, 64, 253] {
        let data = vec![b'G'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("crc8_{size}b"), |b| {
            b.iter(|| black_box(crc8(black_box(&data))));
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    // Typical single G-code line
    let line = b"G01 X10.000 Y20.000 F1200\n";
    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("encode_line", |b| {
        b.iter(|| black_box(encode(0, black_box(line), DEFAULT_ADDRESS, 1).unwrap()));
    });

    // Full chunk, reusing the output buffer
    let full = vec![b'X'; 250];
    let mut out = Vec::with_capacity(256);
    group.throughput(Throughput::Bytes(250));
    group.bench_function("encode_into_250b", |b| {
        b.iter(|| {
            out.clear();
            encode_into(&mut out, 7, black_box(&full), DEFAULT_ADDRESS, 1).unwrap();
            black_box(out.len());
        });
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let encoded = encode(3, &[b'Y'; 250], DEFAULT_ADDRESS, 1).unwrap();
    group.throughput(Throughput::Bytes(250));
    group.bench_function("decode_250b", |b| {
        b.iter(|| black_box(decode(black_box(&encoded)).unwrap()));
    });

    // Scanner has to skip line noise before the frame
    let mut noisy = vec![0x55u8; 64];
    noisy.extend_from_slice(&encoded);
    let mut scanner = FrameScanner::new(Duration::from_millis(10));
    group.bench_function("scan_after_noise", |b| {
        b.iter(|| {
            let outcome = scanner.scan(&mut Cursor::new(black_box(&noisy))).unwrap();
            black_box(outcome.frame().is_some());
        });
    });

    group.finish();
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunker");

    let program: Vec<String> = (0..1000)
        .map(|i| format!("G01 X{}.{:03} Y{} F1200", i % 300, i % 1000, i))
        .collect();
    let payload = serialize_lines(&program).unwrap();

    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("serialize_1000_lines", |b| {
        b.iter(|| black_box(serialize_lines(black_box(&program)).unwrap()));
    });
    group.bench_function("frame_program", |b| {
        let mut out = Vec::with_capacity(payload.len() + 256);
        b.iter(|| {
            out.clear();
            for (sqn, piece) in chunk(&payload, DEFAULT_CHUNK_SIZE).enumerate() {
                encode_into(&mut out, sqn as u8, piece, DEFAULT_ADDRESS, 1).unwrap();
            }
            black_box(out.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_checksum,
    bench_encode,
    bench_decode,
    bench_chunking
);
criterion_main!(benches);
