//! Remote tier: a shared network cache reached over the Redis protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;

use super::types::MAX_TTL;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  #[error("connection pool error: {0}")]
  Pool(String),

  #[error("command failed: {0}")]
  Command(#[from] redis::RedisError),

  #[error("remote unavailable: {0}")]
  Unavailable(String),

  #[error("remote call timed out after {0:?}")]
  Timeout(Duration),

  #[error("remote client closed")]
  Closed,
}

/// A value read from the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
  pub data: Vec<u8>,
  /// Remaining lifetime, `None` when the server reports no expiry.
  pub ttl: Option<Duration>,
}

/// Client for the shared cache service.
///
/// `get` returns `Ok(None)` for a missing key. Errors are reserved for
/// transport and server failures.
#[async_trait]
pub trait RemoteCache: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<RemoteValue>, RemoteError>;
  async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError>;
  /// Returns whether the key was present.
  async fn delete(&self, key: &str) -> Result<bool, RemoteError>;
  async fn exists(&self, key: &str) -> Result<bool, RemoteError>;
  async fn close(&self);
}

/// [`RemoteCache`] over a deadpool-managed Redis connection pool.
pub struct RedisRemote {
  pool: Pool,
  closed: AtomicBool,
}

impl RedisRemote {
  /// Build the pool. No connection is opened until the first command.
  pub fn new(url: &str, pool_size: usize) -> Result<Self, RemoteError> {
    let mut cfg = Config::from_url(url);
    cfg.pool = Some(PoolConfig::new(pool_size.max(1)));
    let pool = cfg
      .create_pool(Some(Runtime::Tokio1))
      .map_err(|e| RemoteError::Pool(e.to_string()))?;
    Ok(Self {
      pool,
      closed: AtomicBool::new(false),
    })
  }

  async fn conn(&self) -> Result<deadpool_redis::Connection, RemoteError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(RemoteError::Closed);
    }
    self
      .pool
      .get()
      .await
      .map_err(|e| RemoteError::Pool(e.to_string()))
  }
}

#[async_trait]
impl RemoteCache for RedisRemote {
  async fn get(&self, key: &str) -> Result<Option<RemoteValue>, RemoteError> {
    let mut conn = self.conn().await?;
    let (data, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
      .get(key)
      .pttl(key)
      .query_async(&mut conn)
      .await?;

    Ok(data.map(|data| RemoteValue {
      data,
      // -1: no expiry, -2: vanished between the two commands
      ttl: (pttl > 0).then_some(Duration::from_millis(pttl as u64)),
    }))
  }

  async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError> {
    let mut conn = self.conn().await?;
    let millis = ttl.min(MAX_TTL).as_millis().max(1) as u64;
    let _: () = redis::cmd("PSETEX")
      .arg(key)
      .arg(millis)
      .arg(value)
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
    let mut conn = self.conn().await?;
    let removed: i64 = conn.del(key).await?;
    Ok(removed > 0)
  }

  async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
    let mut conn = self.conn().await?;
    let found: bool = conn.exists(key).await?;
    Ok(found)
  }

  async fn close(&self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      self.pool.close();
      tracing::info!("Remote cache pool closed");
    }
  }
}
