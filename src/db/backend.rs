use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL dialect of a persistent backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
  Postgres,
  Sqlite,
}

impl SqlDialect {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Postgres => "postgres",
      Self::Sqlite => "sqlite",
    }
  }
}

/// A row of the cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
  pub key: String,
  pub value: Vec<u8>,
  pub expiration: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl StoredEntry {
  /// Time left before the row expires, zero if already past.
  pub fn remaining_ttl(&self, now: DateTime<Utc>) -> std::time::Duration {
    (self.expiration - now).to_std().unwrap_or_default()
  }
}

/// Row counts of the cache table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
  pub total_entries: u64,
  pub active_entries: u64,
  pub expired_entries: u64,
}

/// Relational store behind the persistent tier.
///
/// Reads never return expired rows; expired rows stay on disk until
/// [`purge_expired`](Self::purge_expired) runs.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
  fn dialect(&self) -> SqlDialect;
  fn table(&self) -> &str;

  async fn init_schema(&self) -> Result<(), anyhow::Error>;
  async fn drop_schema(&self) -> Result<(), anyhow::Error>;

  async fn get(&self, key: &str) -> Result<Option<StoredEntry>, anyhow::Error>;
  /// Insert or replace the row for `key`.
  async fn upsert(
    &self,
    key: &str,
    value: &[u8],
    expiration: DateTime<Utc>,
  ) -> Result<(), anyhow::Error>;
  /// Returns whether a row was removed.
  async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;
  async fn exists(&self, key: &str) -> Result<bool, anyhow::Error>;
  /// Non-expired keys, newest first.
  async fn keys(&self) -> Result<Vec<String>, anyhow::Error>;

  /// Delete rows whose expiration has passed. Returns the number removed.
  async fn purge_expired(&self) -> Result<u64, anyhow::Error>;
  async fn clear(&self) -> Result<u64, anyhow::Error>;
  async fn stats(&self) -> Result<TableStats, anyhow::Error>;
}
