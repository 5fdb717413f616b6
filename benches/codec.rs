use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tierstore::codec::{Codec, ZipCodec};

const SIZES: [usize; 3] = [4 * 1024, 256 * 1024, 4 * 1024 * 1024];

fn sample(len: usize) -> Vec<u8> {
    // Text-like content: compressible but not trivially so.
    b"GET /download/42/report-2024.csv 200 18532 \"tierstore\"\n"
        .iter()
        .copied()
        .cycle()
        .enumerate()
        .map(|(idx, byte)| byte.wrapping_add((idx / 4096) as u8))
        .take(len)
        .collect()
}

fn bench_pack(c: &mut Criterion) {
    let codec = ZipCodec::default();
    let mut group = c.benchmark_group("pack");
    for size in SIZES {
        let data = sample(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| codec.pack(black_box(data)).expect("pack"));
        });
    }
    group.finish();
}

fn bench_unpack(c: &mut Criterion) {
    let codec = ZipCodec::default();
    let mut group = c.benchmark_group("unpack");
    for size in SIZES {
        let packed = codec.pack(&sample(size)).expect("pack");
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &packed, |b, packed| {
            b.iter(|| codec.unpack(black_box(packed)).expect("unpack"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pack, bench_unpack);
criterion_main!(benches);
