use std::sync::Arc;
use tokio::sync::broadcast;

use super::{BackendType, ServerConfig};
use crate::admin::AdminServer;
use crate::cache::{CacheManager, RedisRemote, RemoteCache};
use crate::db::{DatabaseBackend, PostgresBackend, SqliteBackend};

pub struct Daemon {
  config: ServerConfig,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(config: ServerConfig) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    Self {
      config,
      shutdown_tx,
    }
  }

  /// Trigger graceful shutdown of the admin server and cache workers
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  /// Connect the configured tiers and build the cache manager.
  pub async fn build_cache(&self) -> Result<Arc<CacheManager>, anyhow::Error> {
    let cache_config = self.config.cache.clone();
    let mut builder = CacheManager::builder(cache_config.clone());

    if cache_config.remote.enabled {
      tracing::info!(url = %cache_config.remote.url, "Using remote cache");
      let remote: Arc<dyn RemoteCache> = Arc::new(RedisRemote::new(
        &cache_config.remote.url,
        cache_config.remote.pool_size,
      )?);
      builder = builder.remote(remote);
    } else {
      tracing::info!("Remote cache disabled, serving from local and persistent tiers");
    }

    if cache_config.persistent.enabled {
      let table = &cache_config.persistent.table;
      let backend: Arc<dyn DatabaseBackend> = match self.config.backend {
        BackendType::Postgres => Arc::new(PostgresBackend::new(
          &self.config.postgres.url,
          table,
          self.config.postgres.max_connections,
        )?),
        BackendType::Sqlite => Arc::new(SqliteBackend::new(&self.config.sqlite.path, table).await?),
      };
      tracing::info!(
        backend = backend.dialect().name(),
        table = %table,
        "Using persistent cache"
      );
      builder = builder.persistent(backend);
    }

    Ok(builder.build().await?)
  }

  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let cache = self.build_cache().await?;
    cache.start();

    let admin = AdminServer::new(
      cache.clone(),
      self.shutdown_tx.subscribe(),
      self.config.clone(),
    );
    let admin_addr = self.config.address();
    tracing::info!("burrow admin API on {}", admin_addr);

    let result = admin.run(&admin_addr).await;
    if let Err(e) = &result {
      tracing::error!("Admin server error: {}", e);
    }

    cache.close().await;
    result
  }
}
