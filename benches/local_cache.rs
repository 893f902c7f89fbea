//! In-process tier benchmarks.
//!
//! Run with: cargo bench --bench local_cache

use std::time::Duration;

use burrow::cache::LocalCache;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const TTL: Duration = Duration::from_secs(300);

fn bench_get(c: &mut Criterion) {
  let mut group = c.benchmark_group("local_get");
  group.throughput(Throughput::Elements(1));

  for size in [100usize, 10_000] {
    let cache = LocalCache::new(size);
    for i in 0..size {
      cache.set(&format!("key:{}", i), b"value", TTL);
    }
    let keys: Vec<String> = (0..size).map(|i| format!("key:{}", i)).collect();

    group.bench_with_input(BenchmarkId::new("hit", size), &keys, |b, keys| {
      let mut i = 0;
      b.iter(|| {
        i = (i + 1) % keys.len();
        black_box(cache.get(&keys[i]));
      });
    });
  }

  let cache = LocalCache::new(100);
  group.bench_function("miss", |b| {
    b.iter(|| black_box(cache.get("absent")));
  });

  group.finish();
}

fn bench_set(c: &mut Criterion) {
  let mut group = c.benchmark_group("local_set");
  group.throughput(Throughput::Elements(1));

  let cache = LocalCache::new(10_000);
  group.bench_function("overwrite", |b| {
    b.iter(|| cache.set("hot", black_box(b"value"), TTL));
  });

  // Every insert past capacity scans for the least recently used entry
  for size in [100usize, 1_000] {
    let cache = LocalCache::new(size);
    for i in 0..size {
      cache.set(&format!("seed:{}", i), b"v", TTL);
    }
    group.bench_with_input(BenchmarkId::new("evicting", size), &size, |b, _| {
      let mut i = 0u64;
      b.iter(|| {
        i += 1;
        cache.set(&format!("new:{}", i), b"v", TTL);
      });
    });
  }

  group.finish();
}

criterion_group!(benches, bench_get, bench_set);
criterion_main!(benches);
