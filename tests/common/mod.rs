#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use burrow::cache::{
  CacheConfig, CacheManager, RemoteCache, RemoteError, RemoteValue,
};
use burrow::db::{DatabaseBackend, SqlDialect, SqliteBackend, StoredEntry, TableStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

/// In-memory stand-in for the shared cache service with a failure switch.
#[derive(Default)]
pub struct MockRemote {
  data: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
  failing: AtomicBool,
  hanging: AtomicBool,
  pub sets: AtomicUsize,
  pub gets: AtomicUsize,
}

impl MockRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Make every call block forever.
  pub fn set_hanging(&self, hanging: bool) {
    self.hanging.store(hanging, Ordering::SeqCst);
  }

  pub fn contains(&self, key: &str) -> bool {
    self
      .data
      .lock()
      .get(key)
      .is_some_and(|(_, exp)| Instant::now() < *exp)
  }

  pub fn value(&self, key: &str) -> Option<Vec<u8>> {
    self
      .data
      .lock()
      .get(key)
      .filter(|(_, exp)| Instant::now() < *exp)
      .map(|(v, _)| v.clone())
  }

  pub fn len(&self) -> usize {
    self.data.lock().len()
  }

  async fn check(&self) -> Result<(), RemoteError> {
    if self.hanging.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    if self.failing.load(Ordering::SeqCst) {
      Err(RemoteError::Unavailable("connection refused".into()))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl RemoteCache for MockRemote {
  async fn get(&self, key: &str) -> Result<Option<RemoteValue>, RemoteError> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    self.check().await?;
    let now = Instant::now();
    Ok(
      self
        .data
        .lock()
        .get(key)
        .filter(|(_, exp)| now < *exp)
        .map(|(v, exp)| RemoteValue {
          data: v.clone(),
          ttl: Some(exp.saturating_duration_since(now)),
        }),
    )
  }

  async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError> {
    self.sets.fetch_add(1, Ordering::SeqCst);
    self.check().await?;
    self
      .data
      .lock()
      .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
    self.check().await?;
    Ok(self.data.lock().remove(key).is_some())
  }

  async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
    self.check().await?;
    Ok(self.contains(key))
  }

  async fn close(&self) {}
}

/// Persistent backend whose every call fails.
pub struct BrokenBackend;

#[async_trait]
impl DatabaseBackend for BrokenBackend {
  fn dialect(&self) -> SqlDialect {
    SqlDialect::Sqlite
  }

  fn table(&self) -> &str {
    "cache_entries"
  }

  async fn init_schema(&self) -> Result<(), anyhow::Error> {
    Ok(())
  }

  async fn drop_schema(&self) -> Result<(), anyhow::Error> {
    Ok(())
  }

  async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn upsert(
    &self,
    _key: &str,
    _value: &[u8],
    _expiration: DateTime<Utc>,
  ) -> Result<(), anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn delete(&self, _key: &str) -> Result<bool, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn exists(&self, _key: &str) -> Result<bool, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn keys(&self) -> Result<Vec<String>, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn purge_expired(&self) -> Result<u64, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn clear(&self) -> Result<u64, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }

  async fn stats(&self) -> Result<TableStats, anyhow::Error> {
    Err(anyhow::anyhow!("database is locked"))
  }
}

/// Defaults with a short remote timeout.
pub fn test_config() -> CacheConfig {
  let mut config = CacheConfig::default();
  config.fallback.failure_threshold = 3;
  config.fallback.recovery_threshold = 2;
  config.fallback.fallback_timeout_ms = 500;
  config.local.max_entries = 100;
  config
}

pub fn local_only_config() -> CacheConfig {
  let mut config = test_config();
  config.remote.enabled = false;
  config.persistent.enabled = false;
  config
}

/// Remote mock plus in-memory SQLite.
pub async fn full_manager(config: CacheConfig) -> (Arc<CacheManager>, Arc<MockRemote>) {
  let remote = MockRemote::new();
  let backend = SqliteBackend::in_memory().await.unwrap();
  let manager = CacheManager::builder(config)
    .remote(remote.clone())
    .persistent(Arc::new(backend))
    .build()
    .await
    .unwrap();
  (manager, remote)
}

/// Remote mock only.
pub async fn remote_manager(mut config: CacheConfig) -> (Arc<CacheManager>, Arc<MockRemote>) {
  config.persistent.enabled = false;
  let remote = MockRemote::new();
  let manager = CacheManager::builder(config)
    .remote(remote.clone())
    .build()
    .await
    .unwrap();
  (manager, remote)
}
