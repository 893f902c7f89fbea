//! Background loops owned by a [`CacheManager`].
//!
//! Each loop keeps only a `Weak` handle to the manager and exits when the
//! shutdown channel fires or the manager is dropped. Shutdown also abandons
//! a tick that is still running.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::manager::CacheManager;

pub(crate) fn spawn_all(manager: &Arc<CacheManager>) -> Vec<JoinHandle<()>> {
  let config = manager.config();
  let mut handles = Vec::new();

  handles.push(spawn_loop(
    "stats",
    manager,
    config.monitor.stats_interval(),
    |m| async move {
      m.monitor().refresh_stats();
    },
  ));

  handles.push(spawn_loop(
    "local_sweep",
    manager,
    config.local.sweep_interval(),
    |m| async move {
      let removed = m.local().sweep_expired();
      if removed > 0 {
        tracing::debug!(removed, "Swept expired local cache entries");
      }
    },
  ));

  if manager.persistent().is_some() {
    handles.push(spawn_loop(
      "persistent_purge",
      manager,
      config.persistent.purge_interval(),
      |m| async move {
        let Some(persistent) = m.persistent() else {
          return;
        };
        match persistent.purge_expired().await {
          Ok(0) => {}
          Ok(removed) => tracing::info!(removed, "Purged expired persistent cache entries"),
          Err(e) => tracing::warn!(error = %e, "Persistent cache purge failed"),
        }
      },
    ));
  }

  if manager.has_remote() && config.fallback.enable_fallback {
    handles.push(spawn_loop(
      "health_check",
      manager,
      config.fallback.health_check_interval(),
      |m| async move {
        m.run_health_check().await;
      },
    ));
  }

  if manager.has_remote() && config.fallback.enable_data_sync {
    handles.push(spawn_loop(
      "reconcile",
      manager,
      config.fallback.sync_interval(),
      |m| async move {
        m.reconcile().await;
      },
    ));
  }

  handles
}

fn spawn_loop<F, Fut>(
  name: &'static str,
  manager: &Arc<CacheManager>,
  period: Duration,
  tick: F,
) -> JoinHandle<()>
where
  F: Fn(Arc<CacheManager>) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  let owner: Weak<CacheManager> = Arc::downgrade(manager);
  let shutdown = manager.subscribe_shutdown();
  tokio::spawn(run_loop(name, owner, period, shutdown, tick))
}

async fn run_loop<F, Fut>(
  name: &'static str,
  owner: Weak<CacheManager>,
  period: Duration,
  mut shutdown: broadcast::Receiver<()>,
  tick: F,
) where
  F: Fn(Arc<CacheManager>) -> Fut,
  Fut: Future<Output = ()>,
{
  let mut interval = tokio::time::interval(period);
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
  // The first tick completes immediately
  interval.tick().await;
  tracing::debug!(worker = name, ?period, "Cache worker started");

  loop {
    tokio::select! {
      biased;
      _ = shutdown.recv() => break,
      _ = interval.tick() => {}
    }
    let Some(manager) = owner.upgrade() else {
      break;
    };
    tokio::select! {
      biased;
      _ = shutdown.recv() => {
        tracing::debug!(worker = name, "Cache worker interrupted mid-tick");
        break;
      }
      _ = tick(manager) => {}
    }
  }

  tracing::debug!(worker = name, "Cache worker stopped");
}
