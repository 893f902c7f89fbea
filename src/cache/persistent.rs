use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::types::{normalize_ttl, DEFAULT_TTL};
use crate::db::{DatabaseBackend, StoredEntry, TableStats};

/// Durable cache tier over a relational table.
///
/// Tracks whether the last backend call succeeded so status reports can
/// show the tier's health without issuing a query.
pub struct PersistentCache {
  backend: Arc<dyn DatabaseBackend>,
  healthy: AtomicBool,
}

impl PersistentCache {
  pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
    Self {
      backend,
      healthy: AtomicBool::new(true),
    }
  }

  pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
    &self.backend
  }

  pub fn is_healthy(&self) -> bool {
    self.healthy.load(Ordering::Relaxed)
  }

  fn track<T>(&self, result: Result<T, anyhow::Error>) -> Result<T, anyhow::Error> {
    self.healthy.store(result.is_ok(), Ordering::Relaxed);
    result
  }

  /// Create the table if it does not exist.
  pub async fn init(&self) -> Result<(), anyhow::Error> {
    let result = self.backend.init_schema().await;
    self.track(result)
  }

  pub async fn get(&self, key: &str) -> Result<Option<StoredEntry>, anyhow::Error> {
    let result = self.backend.get(key).await;
    self.track(result)
  }

  /// Store `value` for `ttl`. A zero TTL means [`DEFAULT_TTL`], anything
  /// above [`MAX_TTL`](super::MAX_TTL) is clamped.
  pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), anyhow::Error> {
    let ttl = chrono::Duration::from_std(normalize_ttl(ttl, DEFAULT_TTL))?;
    let expiration = Utc::now()
      .checked_add_signed(ttl)
      .ok_or_else(|| anyhow::anyhow!("expiration out of range for ttl {}", ttl))?;
    let result = self.backend.upsert(key, value, expiration).await;
    self.track(result)
  }

  pub async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
    let result = self.backend.delete(key).await;
    self.track(result)
  }

  pub async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
    let result = self.backend.exists(key).await;
    self.track(result)
  }

  pub async fn keys(&self) -> Result<Vec<String>, anyhow::Error> {
    let result = self.backend.keys().await;
    self.track(result)
  }

  pub async fn clear(&self) -> Result<u64, anyhow::Error> {
    let result = self.backend.clear().await;
    self.track(result)
  }

  pub async fn stats(&self) -> Result<TableStats, anyhow::Error> {
    let result = self.backend.stats().await;
    self.track(result)
  }

  pub async fn purge_expired(&self) -> Result<u64, anyhow::Error> {
    let result = self.backend.purge_expired().await;
    self.track(result)
  }
}
