//! Bounded in-process cache tier.
//!
//! Entries always carry an expiry. When a new key arrives at capacity,
//! expired entries are dropped first and then the least recently accessed
//! entry is evicted. Recency is a logical sequence number bumped under the
//! read lock, so lookups never take the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::types::{normalize_ttl, DEFAULT_TTL};

struct Entry {
  value: Vec<u8>,
  expires_at: Instant,
  last_access: AtomicU64,
}

impl Entry {
  fn is_expired(&self, now: Instant) -> bool {
    now >= self.expires_at
  }
}

/// A live entry read without touching its recency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekedEntry {
  pub value: Vec<u8>,
  pub remaining_ttl: Duration,
}

/// Counters of the local tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStats {
  pub entries: usize,
  pub capacity: usize,
  pub evictions: u64,
  pub expirations: u64,
}

type EntryMap = Arc<RwLock<HashMap<String, Entry>>>;

pub struct LocalCache {
  entries: EntryMap,
  max_entries: usize,
  clock: AtomicU64,
  evictions: AtomicU64,
  expirations: Arc<AtomicU64>,
}

impl LocalCache {
  pub fn new(max_entries: usize) -> Self {
    Self {
      entries: Arc::new(RwLock::new(HashMap::new())),
      max_entries: max_entries.max(1),
      clock: AtomicU64::new(0),
      evictions: AtomicU64::new(0),
      expirations: Arc::new(AtomicU64::new(0)),
    }
  }

  fn tick(&self) -> u64 {
    self.clock.fetch_add(1, Ordering::Relaxed) + 1
  }

  pub fn get(&self, key: &str) -> Option<Vec<u8>> {
    let now = Instant::now();
    {
      let map = self.entries.read();
      let entry = map.get(key)?;
      if !entry.is_expired(now) {
        entry.last_access.store(self.tick(), Ordering::Relaxed);
        return Some(entry.value.clone());
      }
    }
    self.remove_expired_later(key.to_string());
    None
  }

  /// Drop an expired entry without blocking the caller.
  fn remove_expired_later(&self, key: String) {
    let entries = self.entries.clone();
    let expirations = self.expirations.clone();
    let remove = move |map: &mut HashMap<String, Entry>| {
      if map.get(&key).is_some_and(|e| e.is_expired(Instant::now())) {
        map.remove(&key);
        expirations.fetch_add(1, Ordering::Relaxed);
      }
    };

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(async move {
          remove(&mut *entries.write());
        });
      }
      Err(_) => {
        if let Some(mut map) = entries.try_write() {
          remove(&mut *map);
        }
      }
    }
  }

  /// Store `value` for `ttl`. A zero TTL means [`DEFAULT_TTL`], anything
  /// above [`MAX_TTL`](super::MAX_TTL) is clamped.
  pub fn set(&self, key: &str, value: &[u8], ttl: Duration) {
    let ttl = normalize_ttl(ttl, DEFAULT_TTL);
    let now = Instant::now();
    let entry = Entry {
      value: value.to_vec(),
      expires_at: now + ttl,
      last_access: AtomicU64::new(self.tick()),
    };

    let mut map = self.entries.write();
    if !map.contains_key(key) && map.len() >= self.max_entries {
      let before = map.len();
      map.retain(|_, e| !e.is_expired(now));
      let expired = before - map.len();
      if expired > 0 {
        self
          .expirations
          .fetch_add(expired as u64, Ordering::Relaxed);
      }

      if map.len() >= self.max_entries {
        let oldest = map
          .iter()
          .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
          .map(|(k, _)| k.clone());
        if let Some(oldest) = oldest {
          map.remove(&oldest);
          self.evictions.fetch_add(1, Ordering::Relaxed);
          tracing::debug!(key = %oldest, "Evicted least recently used local entry");
        }
      }
    }
    map.insert(key.to_string(), entry);
  }

  /// Returns whether an entry was removed.
  pub fn delete(&self, key: &str) -> bool {
    self.entries.write().remove(key).is_some()
  }

  pub fn exists(&self, key: &str) -> bool {
    let now = Instant::now();
    self
      .entries
      .read()
      .get(key)
      .is_some_and(|e| !e.is_expired(now))
  }

  /// Non-expired keys, in no particular order.
  pub fn keys(&self) -> Vec<String> {
    let now = Instant::now();
    self
      .entries
      .read()
      .iter()
      .filter(|(_, e)| !e.is_expired(now))
      .map(|(k, _)| k.clone())
      .collect()
  }

  pub fn peek_entry(&self, key: &str) -> Option<PeekedEntry> {
    let now = Instant::now();
    let map = self.entries.read();
    let entry = map.get(key)?;
    if entry.is_expired(now) {
      return None;
    }
    Some(PeekedEntry {
      value: entry.value.clone(),
      remaining_ttl: entry.expires_at.saturating_duration_since(now),
    })
  }

  pub fn clear(&self) {
    self.entries.write().clear();
  }

  /// Number of stored entries, expired ones included until swept.
  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn capacity(&self) -> usize {
    self.max_entries
  }

  /// Remove every expired entry. Returns the number removed.
  pub fn sweep_expired(&self) -> usize {
    let now = Instant::now();
    let mut map = self.entries.write();
    let before = map.len();
    map.retain(|_, e| !e.is_expired(now));
    let removed = before - map.len();
    if removed > 0 {
      self
        .expirations
        .fetch_add(removed as u64, Ordering::Relaxed);
    }
    removed
  }

  pub fn stats(&self) -> LocalStats {
    LocalStats {
      entries: self.len(),
      capacity: self.max_entries,
      evictions: self.evictions.load(Ordering::Relaxed),
      expirations: self.expirations.load(Ordering::Relaxed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_get_delete() {
    let cache = LocalCache::new(10);
    cache.set("a", b"1", Duration::from_secs(60));
    assert_eq!(cache.get("a"), Some(b"1".to_vec()));
    assert!(cache.exists("a"));
    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    assert_eq!(cache.get("a"), None);
  }

  #[test]
  fn test_lru_eviction() {
    let cache = LocalCache::new(3);
    cache.set("a", b"1", Duration::from_secs(60));
    cache.set("b", b"2", Duration::from_secs(60));
    cache.set("c", b"3", Duration::from_secs(60));

    // Touch "a" so "b" becomes the oldest
    assert!(cache.get("a").is_some());
    cache.set("d", b"4", Duration::from_secs(60));

    assert_eq!(cache.len(), 3);
    assert!(!cache.exists("b"));
    assert!(cache.exists("a"));
    assert!(cache.exists("c"));
    assert!(cache.exists("d"));
    assert_eq!(cache.stats().evictions, 1);
  }

  #[test]
  fn test_overwrite_at_capacity_does_not_evict() {
    let cache = LocalCache::new(2);
    cache.set("a", b"1", Duration::from_secs(60));
    cache.set("b", b"2", Duration::from_secs(60));
    cache.set("a", b"3", Duration::from_secs(60));

    assert_eq!(cache.get("a"), Some(b"3".to_vec()));
    assert!(cache.exists("b"));
    assert_eq!(cache.stats().evictions, 0);
  }

  #[test]
  fn test_peek_does_not_refresh_recency() {
    let cache = LocalCache::new(2);
    cache.set("a", b"1", Duration::from_secs(60));
    cache.set("b", b"2", Duration::from_secs(60));

    let peeked = cache.peek_entry("a").unwrap();
    assert_eq!(peeked.value, b"1".to_vec());
    assert!(peeked.remaining_ttl <= Duration::from_secs(60));

    cache.set("c", b"3", Duration::from_secs(60));
    assert!(!cache.exists("a"));
  }

  #[test]
  fn test_zero_ttl_uses_default() {
    let cache = LocalCache::new(2);
    cache.set("a", b"1", Duration::ZERO);
    let peeked = cache.peek_entry("a").unwrap();
    assert!(peeked.remaining_ttl > Duration::from_secs(23 * 60 * 60));
  }

  #[test]
  fn test_huge_ttl_is_clamped() {
    let cache = LocalCache::new(2);
    cache.set("a", b"1", Duration::MAX);
    assert!(cache.exists("a"));
    assert!(cache.peek_entry("a").unwrap().remaining_ttl <= crate::cache::MAX_TTL);
  }

  #[test]
  fn test_capacity_never_zero() {
    let cache = LocalCache::new(0);
    assert_eq!(cache.capacity(), 1);
  }
}
