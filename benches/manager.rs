//! End-to-end manager benchmarks over the local and SQLite tiers.
//!
//! Run with: cargo bench --bench manager

use std::sync::Arc;
use std::time::Duration;

use burrow::cache::{CacheConfig, CacheManager, OpContext};
use burrow::db::SqliteBackend;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
}

fn manager(rt: &Runtime, persistent: bool) -> Arc<CacheManager> {
  let mut config = CacheConfig::default();
  config.remote.enabled = false;
  config.persistent.enabled = persistent;
  rt.block_on(async {
    let mut builder = CacheManager::builder(config);
    if persistent {
      builder = builder.persistent(Arc::new(SqliteBackend::in_memory().await.unwrap()));
    }
    builder.build().await.unwrap()
  })
}

fn bench_get(c: &mut Criterion) {
  let rt = create_runtime();
  let ctx = OpContext::background();
  let cache = manager(&rt, true);
  rt.block_on(async {
    cache
      .set(&ctx, "hot", b"value", Duration::from_secs(600))
      .await
      .unwrap();
  });

  let mut group = c.benchmark_group("manager_get");
  group.throughput(Throughput::Elements(1));

  group.bench_function("local_hit", |b| {
    b.iter(|| rt.block_on(async { black_box(cache.get(&ctx, "hot").await.unwrap()) }));
  });

  group.bench_function("miss_all_tiers", |b| {
    b.iter(|| rt.block_on(async { black_box(cache.get(&ctx, "absent").await.is_err()) }));
  });

  group.finish();
}

fn bench_set(c: &mut Criterion) {
  let rt = create_runtime();
  let ctx = OpContext::background();

  let mut group = c.benchmark_group("manager_set");
  group.throughput(Throughput::Elements(1));

  let local_only = manager(&rt, false);
  group.bench_function("local_only", |b| {
    b.iter(|| {
      rt.block_on(async {
        local_only
          .set(&ctx, "k", black_box(b"value"), Duration::from_secs(60))
          .await
          .unwrap()
      })
    });
  });

  let with_db = manager(&rt, true);
  group.bench_function("local_and_sqlite", |b| {
    b.iter(|| {
      rt.block_on(async {
        with_db
          .set(&ctx, "k", black_box(b"value"), Duration::from_secs(60))
          .await
          .unwrap()
      })
    });
  });

  group.finish();
}

fn bench_json(c: &mut Criterion) {
  let rt = create_runtime();
  let ctx = OpContext::background();
  let cache = manager(&rt, false);
  let value = serde_json::json!({"user": "ada", "roles": ["admin", "ops"], "visits": 42});

  c.bench_function("manager_json_round_trip", |b| {
    b.iter(|| {
      rt.block_on(async {
        cache
          .set_json(&ctx, "profile", &value, Duration::from_secs(60))
          .await
          .unwrap();
        let read: serde_json::Value = cache.get_json(&ctx, "profile").await.unwrap();
        black_box(read)
      })
    });
  });
}

criterion_group!(benches, bench_get, bench_set, bench_json);
criterion_main!(benches);
