use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::sync::Arc;
use tokio_postgres::NoTls;

use super::backend::{DatabaseBackend, SqlDialect, StoredEntry, TableStats};
use super::sanitize::validate_identifier;

struct Queries {
  schema: String,
  drop: String,
  get: String,
  upsert: String,
  delete: String,
  exists: String,
  keys: String,
  purge: String,
  clear: String,
  stats: String,
}

impl Queries {
  fn new(t: &str) -> Self {
    Self {
      schema: format!(
        "CREATE TABLE IF NOT EXISTS {t} (
    key VARCHAR(255) PRIMARY KEY,
    value BYTEA NOT NULL,
    expiration TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_{t}_expiration ON {t}(expiration);"
      ),
      drop: format!("DROP TABLE IF EXISTS {t};"),
      get: format!(
        "SELECT key, value, expiration, created_at, updated_at FROM {t} WHERE key = $1 AND expiration > NOW()"
      ),
      upsert: format!(
        "INSERT INTO {t} (key, value, expiration, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW())
ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expiration = EXCLUDED.expiration, updated_at = NOW()"
      ),
      delete: format!("DELETE FROM {t} WHERE key = $1"),
      exists: format!(
        "SELECT EXISTS(SELECT 1 FROM {t} WHERE key = $1 AND expiration > NOW())"
      ),
      keys: format!("SELECT key FROM {t} WHERE expiration > NOW() ORDER BY created_at DESC"),
      purge: format!("DELETE FROM {t} WHERE expiration <= NOW()"),
      clear: format!("DELETE FROM {t}"),
      stats: format!(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE expiration > NOW()) FROM {t}"
      ),
    }
  }
}

pub struct PostgresBackend {
  pool: Pool,
  table: String,
  queries: Arc<Queries>,
}

impl PostgresBackend {
  pub fn new(url: &str, table: &str, max_connections: usize) -> Result<Self, anyhow::Error> {
    validate_identifier(table)?;

    let mut cfg = Config::new();
    cfg.url = Some(url.into());
    cfg.manager = Some(ManagerConfig {
      recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

    Ok(Self {
      pool,
      table: table.into(),
      queries: Arc::new(Queries::new(table)),
    })
  }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
  fn dialect(&self) -> SqlDialect {
    SqlDialect::Postgres
  }

  fn table(&self) -> &str {
    &self.table
  }

  async fn init_schema(&self) -> Result<(), anyhow::Error> {
    self
      .pool
      .get()
      .await?
      .batch_execute(&self.queries.schema)
      .await?;
    tracing::info!(table = %self.table, "PostgreSQL cache schema initialized");
    Ok(())
  }

  async fn drop_schema(&self) -> Result<(), anyhow::Error> {
    self
      .pool
      .get()
      .await?
      .batch_execute(&self.queries.drop)
      .await?;
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<StoredEntry>, anyhow::Error> {
    let client = self.pool.get().await?;
    let row = client.query_opt(&self.queries.get, &[&key]).await?;
    Ok(row.map(|row| StoredEntry {
      key: row.get(0),
      value: row.get(1),
      expiration: row.get(2),
      created_at: row.get(3),
      updated_at: row.get(4),
    }))
  }

  async fn upsert(
    &self,
    key: &str,
    value: &[u8],
    expiration: DateTime<Utc>,
  ) -> Result<(), anyhow::Error> {
    let client = self.pool.get().await?;
    client
      .execute(&self.queries.upsert, &[&key, &value, &expiration])
      .await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
    let client = self.pool.get().await?;
    let n = client.execute(&self.queries.delete, &[&key]).await?;
    Ok(n > 0)
  }

  async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
    let client = self.pool.get().await?;
    let row = client.query_one(&self.queries.exists, &[&key]).await?;
    Ok(row.get(0))
  }

  async fn keys(&self) -> Result<Vec<String>, anyhow::Error> {
    let client = self.pool.get().await?;
    let rows = client.query(&self.queries.keys, &[]).await?;
    Ok(rows.iter().map(|r| r.get(0)).collect())
  }

  async fn purge_expired(&self) -> Result<u64, anyhow::Error> {
    let client = self.pool.get().await?;
    Ok(client.execute(&self.queries.purge, &[]).await?)
  }

  async fn clear(&self) -> Result<u64, anyhow::Error> {
    let client = self.pool.get().await?;
    Ok(client.execute(&self.queries.clear, &[]).await?)
  }

  async fn stats(&self) -> Result<TableStats, anyhow::Error> {
    let client = self.pool.get().await?;
    let row = client.query_one(&self.queries.stats, &[]).await?;
    let total: i64 = row.get(0);
    let active: i64 = row.get(1);
    let total = total.max(0) as u64;
    let active = active.max(0) as u64;
    Ok(TableStats {
      total_entries: total,
      active_entries: active,
      expired_entries: total.saturating_sub(active),
    })
  }
}
