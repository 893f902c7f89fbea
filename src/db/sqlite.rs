use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use std::sync::Arc;
use tokio_rusqlite::Connection;

use super::backend::{DatabaseBackend, SqlDialect, StoredEntry, TableStats};
use super::sanitize::validate_identifier;

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
"#;

/// Statements for one cache table. Built once, the table name is validated.
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
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expiration TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_{t}_expiration ON {t}(expiration);"
      ),
      drop: format!("DROP TABLE IF EXISTS {t};"),
      get: format!(
        "SELECT key, value, expiration, created_at, updated_at FROM {t} WHERE key = ?1 AND expiration > ?2"
      ),
      upsert: format!(
        "INSERT INTO {t} (key, value, expiration, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)
ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiration = excluded.expiration, updated_at = excluded.updated_at"
      ),
      delete: format!("DELETE FROM {t} WHERE key = ?1"),
      exists: format!("SELECT 1 FROM {t} WHERE key = ?1 AND expiration > ?2 LIMIT 1"),
      keys: format!(
        "SELECT key FROM {t} WHERE expiration > ?1 ORDER BY created_at DESC"
      ),
      purge: format!("DELETE FROM {t} WHERE expiration <= ?1"),
      clear: format!("DELETE FROM {t}"),
      stats: format!(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN expiration > ?1 THEN 1 ELSE 0 END), 0) FROM {t}"
      ),
    }
  }
}

/// Timestamps are stored as fixed-width UTC RFC 3339 text so that string
/// comparison orders them chronologically.
fn ts(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| {
      rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub struct SqliteBackend {
  conn: Connection,
  table: String,
  queries: Arc<Queries>,
}

impl SqliteBackend {
  pub async fn new(path: &str, table: &str) -> Result<Self, anyhow::Error> {
    validate_identifier(table)?;

    let conn = if path == ":memory:" {
      Connection::open_in_memory().await?
    } else {
      Connection::open(path).await?
    };

    conn
      .call(|conn| conn.execute_batch(PRAGMAS).map_err(|e| e.into()))
      .await?;

    Ok(Self {
      conn,
      table: table.into(),
      queries: Arc::new(Queries::new(table)),
    })
  }

  pub async fn in_memory() -> Result<Self, anyhow::Error> {
    Self::new(":memory:", "cache_entries").await
  }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
  fn dialect(&self) -> SqlDialect {
    SqlDialect::Sqlite
  }

  fn table(&self) -> &str {
    &self.table
  }

  async fn init_schema(&self) -> Result<(), anyhow::Error> {
    let q = self.queries.clone();
    self
      .conn
      .call(move |conn| conn.execute_batch(&q.schema).map_err(|e| e.into()))
      .await?;
    tracing::info!(table = %self.table, "SQLite cache schema initialized");
    Ok(())
  }

  async fn drop_schema(&self) -> Result<(), anyhow::Error> {
    let q = self.queries.clone();
    self
      .conn
      .call(move |conn| conn.execute_batch(&q.drop).map_err(|e| e.into()))
      .await?;
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<StoredEntry>, anyhow::Error> {
    let q = self.queries.clone();
    let key = key.to_string();
    let now = ts(Utc::now());

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&q.get)?;
        let mut rows = stmt.query(params![key, now])?;
        if let Some(row) = rows.next()? {
          Ok(Some(row_to_entry(row)?))
        } else {
          Ok(None)
        }
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn upsert(
    &self,
    key: &str,
    value: &[u8],
    expiration: DateTime<Utc>,
  ) -> Result<(), anyhow::Error> {
    let q = self.queries.clone();
    let key = key.to_string();
    let value = value.to_vec();
    let expiration = ts(expiration);
    let now = ts(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn
          .execute(&q.upsert, params![key, value, expiration, now])
          .map_err(|e| e.into())
      })
      .await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
    let q = self.queries.clone();
    let key = key.to_string();
    let changed = self
      .conn
      .call(move |conn| conn.execute(&q.delete, params![key]).map_err(|e| e.into()))
      .await?;
    Ok(changed > 0)
  }

  async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
    let q = self.queries.clone();
    let key = key.to_string();
    let now = ts(Utc::now());

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&q.exists)?;
        Ok(stmt.exists(params![key, now])?)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn keys(&self) -> Result<Vec<String>, anyhow::Error> {
    let q = self.queries.clone();
    let now = ts(Utc::now());

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&q.keys)?;
        let keys = stmt
          .query_map(params![now], |row| row.get::<_, String>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn purge_expired(&self) -> Result<u64, anyhow::Error> {
    let q = self.queries.clone();
    let now = ts(Utc::now());
    let removed = self
      .conn
      .call(move |conn| conn.execute(&q.purge, params![now]).map_err(|e| e.into()))
      .await?;
    Ok(removed as u64)
  }

  async fn clear(&self) -> Result<u64, anyhow::Error> {
    let q = self.queries.clone();
    let removed = self
      .conn
      .call(move |conn| conn.execute(&q.clear, []).map_err(|e| e.into()))
      .await?;
    Ok(removed as u64)
  }

  async fn stats(&self) -> Result<TableStats, anyhow::Error> {
    let q = self.queries.clone();
    let now = ts(Utc::now());

    let (total, active) = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&q.stats)?;
        let counts = stmt.query_row(params![now], |row| {
          Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(counts)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))?;

    let total = total.max(0) as u64;
    let active = active.max(0) as u64;
    Ok(TableStats {
      total_entries: total,
      active_entries: active,
      expired_entries: total.saturating_sub(active),
    })
  }
}

fn row_to_entry(row: &rusqlite::Row) -> Result<StoredEntry, rusqlite::Error> {
  let expiration: String = row.get(2)?;
  let created_at: String = row.get(3)?;
  let updated_at: String = row.get(4)?;
  Ok(StoredEntry {
    key: row.get(0)?,
    value: row.get(1)?,
    expiration: parse_ts(2, &expiration)?,
    created_at: parse_ts(3, &created_at)?,
    updated_at: parse_ts(4, &updated_at)?,
  })
}
