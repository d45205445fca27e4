//! Benchmarks for buffer operations and drain data handling
//!
//! Run with: cargo bench

use blobdrain::{Buffer, DrainData, Item, QueueBuffer, Token};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::{BTreeMap, VecDeque};

fn bench_single_item_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_item_handoff");
    group.throughput(Throughput::Elements(1));

    let buffer = QueueBuffer::bounded(1024).unwrap();
    group.bench_function("write_then_read", |b| {
        let mut i = 0i64;
        b.iter(|| {
            buffer.write(Item::Int(black_box(i))).unwrap();
            black_box(buffer.read().unwrap());
            i = i.wrapping_add(1);
        });
    });

    group.finish();
}

fn bench_bulk_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_transfer");

    for size in [64usize, 1024, 16_384].iter() {
        let buffer = QueueBuffer::unbounded();
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("write_from", size), size, |b, &size| {
            b.iter(|| {
                let mut batch: VecDeque<Item> = (0..size as i64).map(Item::Int).collect();
                black_box(buffer.write_from(&mut batch).unwrap());
                buffer.read_all(size).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("read_all", size), size, |b, &size| {
            b.iter(|| {
                let mut batch: VecDeque<Item> = (0..size as i64).map(Item::Int).collect();
                buffer.write_from(&mut batch).unwrap();
                black_box(buffer.read_all(size).unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("read_into", size), size, |b, &size| {
            let mut dst = Vec::with_capacity(size);
            b.iter(|| {
                let mut batch: VecDeque<Item> = (0..size as i64).map(Item::Int).collect();
                buffer.write_from(&mut batch).unwrap();
                dst.clear();
                black_box(buffer.read_into(&mut dst, size).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_drain_data_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_data_merge");

    for tokens in [4i32, 64].iter() {
        let snapshot = |offset: i64| {
            let data: BTreeMap<Token, Vec<Item>> = (0..*tokens)
                .map(|t| {
                    let items = (0..32).map(|i| Item::Int(offset + i)).collect();
                    (Token::new(t, t + 1), items)
                })
                .collect();
            DrainData::from_data(data)
        };
        let left = snapshot(0);
        let right = snapshot(32);

        group.throughput(Throughput::Elements(*tokens as u64));
        group.bench_with_input(BenchmarkId::new("merge", tokens), &(left, right), |b, (l, r)| {
            b.iter(|| black_box(l.merge(r).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_item_handoff,
    bench_bulk_transfer,
    bench_drain_data_merge,
);
criterion_main!(benches);
