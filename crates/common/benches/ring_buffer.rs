//! Benchmarks for the fixed-record ring buffer
//!
//! Measures single-threaded put/get throughput for typical HID report sizes
//! and the cost of duplicate suppression.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hidlink_common::RingBuffer;

const CAPACITY: usize = 128;

fn benchmark_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_get");

    for record_len in [8usize, 33, 64] {
        let ring = RingBuffer::new(CAPACITY, record_len);
        let record = vec![0xA5u8; record_len];
        let mut out = vec![0u8; record_len];

        group.throughput(Throughput::Bytes(record_len as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(record_len),
            &record_len,
            |b, _| {
                b.iter(|| {
                    ring.put(black_box(&record)).unwrap();
                    ring.get(black_box(&mut out)).unwrap();
                })
            },
        );
    }

    group.finish();
}

fn benchmark_overwrite(c: &mut Criterion) {
    let ring = RingBuffer::new(CAPACITY, 33);
    let record = vec![1u8; 33];
    for _ in 0..CAPACITY {
        ring.put(&record).unwrap();
    }

    c.bench_function("put_overwrite_full", |b| {
        b.iter(|| ring.put(black_box(&record)).unwrap())
    });
}

fn benchmark_duplicate_suppression(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_suppression");
    let ring = RingBuffer::new(CAPACITY, 33);
    let record = vec![7u8; 33];
    ring.put(&record).unwrap();

    group.bench_function("suppressed", |b| {
        b.iter(|| ring.try_put_if_changed(black_box(&record)).unwrap())
    });

    let mut toggle = 0u8;
    let mut changing = vec![0u8; 33];
    let mut out = vec![0u8; 33];
    group.bench_function("inserted", |b| {
        b.iter(|| {
            toggle = toggle.wrapping_add(1);
            changing[0] = toggle;
            ring.try_put_if_changed(black_box(&changing)).unwrap();
            let _ = ring.get(&mut out);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_put_get,
    benchmark_overwrite,
    benchmark_duplicate_suppression
);
criterion_main!(benches);
