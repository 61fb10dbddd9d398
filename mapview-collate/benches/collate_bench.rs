//! Benchmarks for collation and key encoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mapview_collate::{collate, to_indexable_string};
use serde_json::{json, Value};

fn sample_keys(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| match i % 4 {
            0 => json!(i),
            1 => json!(format!("key-{i}")),
            2 => json!([i % 7, format!("doc-{i}")]),
            _ => json!({"n": i, "tag": "x"}),
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let composite = json!(["some key", "doc-0001", {"value": 42}, 3]);

    c.bench_function("encode_composite_key", |b| {
        b.iter(|| {
            let encoded = to_indexable_string(black_box(&composite));
            black_box(encoded);
        })
    });
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_keys");

    for size in [100, 1_000] {
        let keys = sample_keys(size);

        group.bench_with_input(BenchmarkId::new("collate", size), &keys, |b, keys| {
            b.iter(|| {
                let mut sorted = keys.clone();
                sorted.sort_by(collate);
                black_box(sorted);
            })
        });

        group.bench_with_input(BenchmarkId::new("encoded", size), &keys, |b, keys| {
            b.iter(|| {
                let mut encoded: Vec<String> = keys.iter().map(to_indexable_string).collect();
                encoded.sort();
                black_box(encoded);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_sort);
criterion_main!(benches);
