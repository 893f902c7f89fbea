use std::time::Duration;

use burrow::db::{DatabaseBackend, SqlDialect, SqliteBackend};
use chrono::Utc;

async fn backend() -> SqliteBackend {
  let backend = SqliteBackend::in_memory().await.unwrap();
  backend.init_schema().await.unwrap();
  backend
}

fn in_secs(secs: i64) -> chrono::DateTime<Utc> {
  Utc::now() + chrono::Duration::seconds(secs)
}

#[tokio::test]
async fn test_sqlite_backend_init_schema() {
  let backend = SqliteBackend::in_memory().await.unwrap();
  backend.init_schema().await.unwrap();
  // Should not panic on re-init
  backend.init_schema().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_backend_dialect() {
  let backend = SqliteBackend::in_memory().await.unwrap();
  assert_eq!(backend.dialect(), SqlDialect::Sqlite);
  assert_eq!(backend.table(), "cache_entries");
}

#[tokio::test]
async fn test_sqlite_backend_rejects_bad_table_name() {
  assert!(SqliteBackend::new(":memory:", "entries; DROP TABLE x").await.is_err());
  assert!(SqliteBackend::new(":memory:", "").await.is_err());
}

#[tokio::test]
async fn test_sqlite_backend_upsert_and_get() {
  let backend = backend().await;
  let expiration = in_secs(60);

  backend.upsert("k", b"first", expiration).await.unwrap();
  let entry = backend.get("k").await.unwrap().unwrap();
  assert_eq!(entry.key, "k");
  assert_eq!(entry.value, b"first");
  assert_eq!(entry.created_at, entry.updated_at);
  let ttl = entry.remaining_ttl(Utc::now());
  assert!(ttl > Duration::from_secs(55) && ttl <= Duration::from_secs(60));
}

#[tokio::test]
async fn test_sqlite_backend_upsert_replaces_value() {
  let backend = backend().await;

  backend.upsert("k", b"first", in_secs(60)).await.unwrap();
  let first = backend.get("k").await.unwrap().unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;
  backend.upsert("k", b"second", in_secs(120)).await.unwrap();

  let second = backend.get("k").await.unwrap().unwrap();
  assert_eq!(second.value, b"second");
  assert_eq!(second.created_at, first.created_at);
  assert!(second.updated_at > first.updated_at);
  assert!(second.expiration > first.expiration);
  assert_eq!(backend.stats().await.unwrap().total_entries, 1);
}

#[tokio::test]
async fn test_sqlite_backend_binary_values() {
  let backend = backend().await;
  let value: Vec<u8> = (0..=255).collect();

  backend.upsert("bin", &value, in_secs(60)).await.unwrap();
  assert_eq!(backend.get("bin").await.unwrap().unwrap().value, value);
}

#[tokio::test]
async fn test_sqlite_backend_delete() {
  let backend = backend().await;
  backend.upsert("k", b"v", in_secs(60)).await.unwrap();

  assert!(backend.delete("k").await.unwrap());
  assert!(!backend.delete("k").await.unwrap());
  assert!(backend.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_backend_expired_rows_hidden_until_purged() {
  let backend = backend().await;
  backend.upsert("live", b"1", in_secs(60)).await.unwrap();
  backend.upsert("stale", b"2", in_secs(-5)).await.unwrap();

  assert!(backend.get("stale").await.unwrap().is_none());
  assert!(!backend.exists("stale").await.unwrap());
  assert!(backend.exists("live").await.unwrap());
  assert_eq!(backend.keys().await.unwrap(), vec!["live".to_string()]);

  let stats = backend.stats().await.unwrap();
  assert_eq!(stats.total_entries, 2);
  assert_eq!(stats.active_entries, 1);
  assert_eq!(stats.expired_entries, 1);

  assert_eq!(backend.purge_expired().await.unwrap(), 1);
  assert_eq!(backend.purge_expired().await.unwrap(), 0);
  assert_eq!(backend.stats().await.unwrap().total_entries, 1);
}

#[tokio::test]
async fn test_sqlite_backend_row_expires_in_place() {
  let backend = backend().await;
  let expiration = Utc::now() + chrono::Duration::milliseconds(50);
  backend.upsert("short", b"v", expiration).await.unwrap();

  assert!(backend.exists("short").await.unwrap());
  tokio::time::sleep(Duration::from_millis(80)).await;
  assert!(!backend.exists("short").await.unwrap());
}

#[tokio::test]
async fn test_sqlite_backend_keys_newest_first() {
  let backend = backend().await;
  for key in ["a", "b", "c"] {
    backend.upsert(key, b"v", in_secs(60)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  assert_eq!(backend.keys().await.unwrap(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_sqlite_backend_clear() {
  let backend = backend().await;
  backend.upsert("a", b"1", in_secs(60)).await.unwrap();
  backend.upsert("b", b"2", in_secs(-1)).await.unwrap();

  assert_eq!(backend.clear().await.unwrap(), 2);
  assert_eq!(backend.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_sqlite_backend_file_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("cache.db");
  let path = path.to_str().unwrap();

  {
    let backend = SqliteBackend::new(path, "sessions").await.unwrap();
    backend.init_schema().await.unwrap();
    backend.upsert("s1", b"token", in_secs(60)).await.unwrap();
  }

  let backend = SqliteBackend::new(path, "sessions").await.unwrap();
  backend.init_schema().await.unwrap();
  assert_eq!(backend.table(), "sessions");
  assert_eq!(backend.get("s1").await.unwrap().unwrap().value, b"token");
}

#[tokio::test]
async fn test_sqlite_backend_drop_schema() {
  let backend = backend().await;
  backend.upsert("k", b"v", in_secs(60)).await.unwrap();
  backend.drop_schema().await.unwrap();
  assert!(backend.get("k").await.is_err());

  backend.init_schema().await.unwrap();
  assert!(backend.get("k").await.unwrap().is_none());
}
