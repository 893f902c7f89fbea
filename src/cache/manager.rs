//! Tier routing and the fallback state machine.
//!
//! In normal mode reads go remote, then local, then persistent. In fallback
//! mode the remote tier is skipped entirely. The monitor's streak counters
//! are the only input to mode transitions.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::config::CacheConfig;
use super::context::OpContext;
use super::error::{CacheError, ConfigError, TierErrors};
use super::local::{LocalCache, LocalStats};
use super::monitor::{Event, EventKind, HealthSummary, Monitor, Operation, StatsSnapshot};
use super::persistent::PersistentCache;
use super::remote::{RemoteCache, RemoteError};
use super::types::{normalize_ttl, Mode, Tier};
use super::workers;
use crate::db::{DatabaseBackend, TableStats};

const PROBE_TTL: Duration = Duration::from_secs(1);
const SELF_TEST_TTL: Duration = Duration::from_secs(5 * 60);
const METRICS_EVENT_LIMIT: usize = 10;

/// Health of each configured tier. `None` means the tier is not configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierHealth {
  pub remote: Option<bool>,
  pub local: bool,
  pub persistent: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
  pub mode: Mode,
  pub fallback_active: bool,
  pub tiers: TierHealth,
  pub stats: StatsSnapshot,
  pub local: LocalStats,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub persistent: Option<TableStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
  pub status: CacheStatus,
  pub recent_events: Vec<Event>,
  pub timestamp: DateTime<Utc>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
  pub synced: usize,
  pub failed: usize,
  /// Pass skipped because the manager was in fallback mode or has no remote
  pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
  pub success: bool,
  pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestReport {
  pub success: bool,
  pub test_key: String,
  pub set: StepTiming,
  pub get: StepTiming,
  pub value_matches: bool,
  pub exists_check: StepTiming,
  pub exists: bool,
  pub delete: StepTiming,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SelfTestValue {
  test: bool,
  timestamp: DateTime<Utc>,
  message: String,
}

/// Assembles a [`CacheManager`] from configuration and tier implementations.
pub struct CacheManagerBuilder {
  config: CacheConfig,
  remote: Option<Arc<dyn RemoteCache>>,
  persistent: Option<Arc<dyn DatabaseBackend>>,
}

impl CacheManagerBuilder {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      config,
      remote: None,
      persistent: None,
    }
  }

  pub fn remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
    self.remote = Some(remote);
    self
  }

  pub fn persistent(mut self, backend: Arc<dyn DatabaseBackend>) -> Self {
    self.persistent = Some(backend);
    self
  }

  /// Validate the configuration, initialize the persistent schema and
  /// return the manager. Background workers are not started; call
  /// [`CacheManager::start`].
  pub async fn build(self) -> Result<Arc<CacheManager>, CacheError> {
    let config = self.config;
    config.validate()?;

    let remote = match (config.remote.enabled, self.remote) {
      (true, Some(remote)) => Some(remote),
      (true, None) => return Err(ConfigError::MissingTier(Tier::Remote).into()),
      (false, Some(_)) => {
        tracing::warn!("Remote tier supplied but disabled in configuration, ignoring it");
        None
      }
      (false, None) => None,
    };

    let persistent = match (config.persistent.enabled, self.persistent) {
      (true, Some(backend)) => {
        let tier = PersistentCache::new(backend);
        tier
          .init()
          .await
          .map_err(|e| CacheError::tier(Tier::Persistent, e))?;
        Some(tier)
      }
      (true, None) => return Err(ConfigError::MissingTier(Tier::Persistent).into()),
      (false, Some(_)) => {
        tracing::warn!("Persistent tier supplied but disabled in configuration, ignoring it");
        None
      }
      (false, None) => None,
    };

    let (shutdown, _) = broadcast::channel(1);
    let manager = CacheManager {
      monitor: Monitor::new(&config.monitor),
      local: LocalCache::new(config.local.max_entries),
      mode: RwLock::new(Mode::Normal),
      remote,
      persistent,
      shutdown,
      workers: Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
      config,
    };
    manager.monitor.refresh_stats();

    tracing::info!(
      remote = manager.remote.is_some(),
      persistent = manager.persistent.is_some(),
      local_capacity = manager.config.local.max_entries,
      "Cache manager initialized"
    );

    Ok(Arc::new(manager))
  }
}

/// Single access point for the cache tiers.
pub struct CacheManager {
  config: CacheConfig,
  mode: RwLock<Mode>,
  monitor: Monitor,
  remote: Option<Arc<dyn RemoteCache>>,
  local: LocalCache,
  persistent: Option<PersistentCache>,
  shutdown: broadcast::Sender<()>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  closed: AtomicBool,
}

impl CacheManager {
  pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
    CacheManagerBuilder::new(config)
  }

  /// Spawn the background workers. Calling it again is a no-op.
  pub fn start(self: &Arc<Self>) {
    let mut handles = self.workers.lock();
    if !handles.is_empty() || self.closed.load(Ordering::Acquire) {
      return;
    }
    handles.extend(workers::spawn_all(self));
    tracing::info!(workers = handles.len(), "Cache workers started");
  }

  /// Stop the workers, wait for them and close the remote client.
  pub async fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let _ = self.shutdown.send(());

    let handles = std::mem::take(&mut *self.workers.lock());
    for handle in handles {
      if let Err(e) = handle.await {
        tracing::warn!(error = %e, "Cache worker ended abnormally");
      }
    }

    if let Some(remote) = &self.remote {
      remote.close().await;
    }
    tracing::info!("Cache manager closed");
  }

  pub(crate) fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
    self.shutdown.subscribe()
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  pub fn mode(&self) -> Mode {
    *self.mode.read()
  }

  pub fn is_fallback(&self) -> bool {
    self.mode().is_fallback()
  }

  pub fn monitor(&self) -> &Monitor {
    &self.monitor
  }

  pub fn local(&self) -> &LocalCache {
    &self.local
  }

  pub fn persistent(&self) -> Option<&PersistentCache> {
    self.persistent.as_ref()
  }

  pub fn has_remote(&self) -> bool {
    self.remote.is_some()
  }

  /// The remote tier, unless it is absent or bypassed by fallback mode.
  fn active_remote(&self) -> Option<&Arc<dyn RemoteCache>> {
    self.remote.as_ref().filter(|_| !self.is_fallback())
  }

  /// Run a remote call under the context and the fallback timeout.
  /// The outer error is the caller's context firing.
  async fn remote_call<T, F>(
    &self,
    ctx: &OpContext,
    fut: F,
  ) -> Result<Result<T, RemoteError>, CacheError>
  where
    F: Future<Output = Result<T, RemoteError>>,
  {
    let timeout = self.config.fallback.fallback_timeout();
    let result = ctx.run(tokio::time::timeout(timeout, fut)).await?;
    Ok(result.unwrap_or(Err(RemoteError::Timeout(timeout))))
  }

  fn record_remote_failure(&self, op: Operation, key: &str, err: &RemoteError) {
    tracing::warn!(key = %key, operation = %op, error = %err, "Remote cache operation failed");
    self.monitor.record_failure(op, err);
  }

  /// Read `key` from the first tier that holds it.
  ///
  /// A remote failure is recorded and the read continues on the local and
  /// persistent tiers. Mode transitions are evaluated once the read is done.
  pub async fn get(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>, CacheError> {
    ctx.check()?;

    if let Some(remote) = self.active_remote() {
      match self.remote_call(ctx, remote.get(key)).await? {
        Ok(Some(value)) => {
          self.monitor.record_hit(Tier::Remote);
          let ttl = value.ttl.unwrap_or_else(|| self.config.fallback.mirror_ttl());
          self.local.set(key, &value.data, ttl);
          return Ok(value.data);
        }
        Ok(None) => {}
        Err(e) => {
          self.record_remote_failure(Operation::RemoteGet, key, &e);
          let result = self.get_fallback_tiers(ctx, key).await;
          self.evaluate_mode();
          return result;
        }
      }
    }

    self.get_fallback_tiers(ctx, key).await
  }

  async fn get_fallback_tiers(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>, CacheError> {
    ctx.check()?;
    if let Some(value) = self.local.get(key) {
      self.monitor.record_hit(Tier::Local);
      return Ok(value);
    }

    if let Some(persistent) = &self.persistent {
      match ctx.run(persistent.get(key)).await? {
        Ok(Some(entry)) => {
          self.monitor.record_hit(Tier::Persistent);
          let remaining = entry.remaining_ttl(Utc::now());
          if !remaining.is_zero() {
            self.local.set(key, &entry.value, remaining);
          }
          return Ok(entry.value);
        }
        Ok(None) => {}
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Persistent cache get failed");
          self.monitor.record_failure(Operation::PersistentGet, &e);
        }
      }
    }

    self.monitor.record_miss(key);
    Err(CacheError::Miss {
      key: key.to_string(),
    })
  }

  /// Store `value` for `ttl`; a zero TTL means the configured default.
  ///
  /// Errors only when every attempted tier failed.
  pub async fn set(
    &self,
    ctx: &OpContext,
    key: &str,
    value: &[u8],
    ttl: Duration,
  ) -> Result<(), CacheError> {
    ctx.check()?;
    let ttl = normalize_ttl(ttl, self.config.fallback.default_ttl());
    let mut errors = TierErrors::default();

    if let Some(remote) = self.active_remote() {
      match self.remote_call(ctx, remote.set(key, value, ttl)).await? {
        Ok(()) => {
          self.monitor.record_success(Operation::RemoteSet);
          self.local.set(key, value, ttl);
          self.monitor.record_success(Operation::LocalSet);
          return Ok(());
        }
        Err(e) => {
          self.record_remote_failure(Operation::RemoteSet, key, &e);
          errors.push(Tier::Remote, e);
          let result = self.set_fallback_tiers(ctx, key, value, ttl, errors, 1).await;
          self.evaluate_mode();
          return result;
        }
      }
    }

    self.set_fallback_tiers(ctx, key, value, ttl, errors, 0).await
  }

  async fn set_fallback_tiers(
    &self,
    ctx: &OpContext,
    key: &str,
    value: &[u8],
    ttl: Duration,
    mut errors: TierErrors,
    mut attempted: usize,
  ) -> Result<(), CacheError> {
    ctx.check()?;
    attempted += 1;
    self.local.set(key, value, ttl);
    self.monitor.record_success(Operation::LocalSet);

    if let Some(persistent) = &self.persistent {
      attempted += 1;
      match ctx.run(persistent.set(key, value, ttl)).await? {
        Ok(()) => self.monitor.record_success(Operation::PersistentSet),
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Persistent cache set failed");
          self.monitor.record_failure(Operation::PersistentSet, &e);
          errors.push(Tier::Persistent, e);
        }
      }
    }

    if errors.len() == attempted {
      self.monitor.record_failure(Operation::AllSet, &errors);
      return Err(CacheError::AllTiersFailed {
        key: key.to_string(),
        errors,
      });
    }
    Ok(())
  }

  /// Remove `key` from every tier. Deleting an absent key succeeds.
  pub async fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), CacheError> {
    ctx.check()?;
    let mut errors = TierErrors::default();

    if let Some(remote) = self.active_remote() {
      match self.remote_call(ctx, remote.delete(key)).await? {
        Ok(_) => self.monitor.record_success(Operation::RemoteDelete),
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Remote cache delete failed");
          self.monitor.record_failure(Operation::RemoteDelete, &e);
          errors.push(Tier::Remote, e);
        }
      }
    }

    ctx.check()?;
    self.local.delete(key);
    self.monitor.record_success(Operation::LocalDelete);

    if let Some(persistent) = &self.persistent {
      match ctx.run(persistent.delete(key)).await? {
        Ok(_) => self.monitor.record_success(Operation::PersistentDelete),
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Persistent cache delete failed");
          self.monitor.record_failure(Operation::PersistentDelete, &e);
          errors.push(Tier::Persistent, e);
        }
      }
    }

    if errors.is_empty() {
      Ok(())
    } else {
      Err(CacheError::Partial {
        operation: "delete",
        errors,
      })
    }
  }

  /// True as soon as any tier holds a live entry for `key`. Errors only
  /// when no attempted tier could answer.
  pub async fn exists(&self, ctx: &OpContext, key: &str) -> Result<bool, CacheError> {
    ctx.check()?;
    let mut errors = TierErrors::default();

    if let Some(remote) = self.active_remote() {
      match self.remote_call(ctx, remote.exists(key)).await? {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(e) => {
          self.record_remote_failure(Operation::RemoteExists, key, &e);
          errors.push(Tier::Remote, e);
          let result = self.exists_fallback_tiers(ctx, key, errors, 1).await;
          self.evaluate_mode();
          return result;
        }
      }
    }

    self.exists_fallback_tiers(ctx, key, errors, 0).await
  }

  async fn exists_fallback_tiers(
    &self,
    ctx: &OpContext,
    key: &str,
    mut errors: TierErrors,
    mut attempted: usize,
  ) -> Result<bool, CacheError> {
    ctx.check()?;
    attempted += 1;
    if self.local.exists(key) {
      return Ok(true);
    }

    if let Some(persistent) = &self.persistent {
      attempted += 1;
      match ctx.run(persistent.exists(key)).await? {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Persistent cache exists failed");
          self.monitor.record_failure(Operation::PersistentExists, &e);
          errors.push(Tier::Persistent, e);
        }
      }
    }

    if errors.len() == attempted {
      Err(CacheError::Partial {
        operation: "exists",
        errors,
      })
    } else {
      Ok(false)
    }
  }

  pub async fn get_json<T: DeserializeOwned>(
    &self,
    ctx: &OpContext,
    key: &str,
  ) -> Result<T, CacheError> {
    let bytes = self.get(ctx, key).await?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  pub async fn set_json<T: Serialize + ?Sized>(
    &self,
    ctx: &OpContext,
    key: &str,
    value: &T,
    ttl: Duration,
  ) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value)?;
    self.set(ctx, key, &bytes, ttl).await
  }

  /// Apply any transition the monitor's counters call for.
  pub(crate) fn evaluate_mode(&self) {
    let fallback = &self.config.fallback;
    match self.mode() {
      Mode::Normal => {
        let failures = self.monitor.failure_count();
        if fallback.enable_fallback && failures >= u64::from(fallback.failure_threshold) {
          self.enter_fallback(&format!(
            "{} consecutive remote failures reached threshold {}",
            failures, fallback.failure_threshold
          ));
        }
      }
      Mode::Fallback => {
        let probes = self.monitor.probe_success_count();
        if probes >= u64::from(fallback.recovery_threshold) {
          self.leave_fallback(&format!(
            "{} consecutive successful health checks reached threshold {}",
            probes, fallback.recovery_threshold
          ));
        }
      }
    }
  }

  fn enter_fallback(&self, reason: &str) -> bool {
    let mut mode = self.mode.write();
    if mode.is_fallback() {
      return false;
    }
    *mode = Mode::Fallback;
    self
      .monitor
      .record_fallback_event(EventKind::FallbackEnabled, reason);
    if self.config.fallback.log_fallback_events {
      tracing::warn!(reason = %reason, "Cache fallback mode enabled");
    }
    true
  }

  fn leave_fallback(&self, reason: &str) -> bool {
    let mut mode = self.mode.write();
    if !mode.is_fallback() {
      return false;
    }
    *mode = Mode::Normal;
    self
      .monitor
      .record_fallback_event(EventKind::FallbackDisabled, reason);
    if self.config.fallback.log_fallback_events {
      tracing::info!(reason = %reason, "Cache fallback mode disabled");
    }
    true
  }

  /// Probe the remote tier with a short-lived write and delete.
  ///
  /// Runs regardless of mode. Returns whether the probe succeeded.
  pub async fn run_health_check(&self) -> bool {
    let Some(remote) = &self.remote else {
      return false;
    };

    let key = format!("health_check_{}", Uuid::new_v4());
    let timeout = self.config.fallback.fallback_timeout();
    let started = Instant::now();
    let probe = async {
      remote.set(&key, b"ok", PROBE_TTL).await?;
      remote.delete(&key).await?;
      Ok::<_, RemoteError>(())
    };
    let result = tokio::time::timeout(timeout, probe)
      .await
      .unwrap_or(Err(RemoteError::Timeout(timeout)));

    let healthy = match result {
      Ok(()) => {
        self
          .monitor
          .record_timed_success(Operation::HealthCheck, started.elapsed());
        true
      }
      Err(e) => {
        tracing::warn!(error = %e, "Remote cache health check failed");
        self.monitor.record_failure(Operation::HealthCheck, &e);
        false
      }
    };
    self.evaluate_mode();
    healthy
  }

  /// Push every live local entry to the remote tier with its remaining TTL.
  ///
  /// Skipped in fallback mode. Last writer wins; failures are only logged.
  pub async fn reconcile(&self) -> SyncReport {
    let Some(remote) = self.active_remote() else {
      return SyncReport {
        skipped: true,
        ..Default::default()
      };
    };

    let timeout = self.config.fallback.fallback_timeout();
    let mut report = SyncReport::default();
    for key in self.local.keys() {
      let Some(entry) = self.local.peek_entry(&key) else {
        continue;
      };
      let pushed = tokio::time::timeout(
        timeout,
        remote.set(&key, &entry.value, entry.remaining_ttl),
      )
      .await;
      match pushed {
        Ok(Ok(())) => report.synced += 1,
        Ok(Err(e)) => {
          tracing::debug!(key = %key, error = %e, "Reconcile write failed");
          report.failed += 1;
        }
        Err(_) => {
          tracing::debug!(key = %key, "Reconcile write timed out");
          report.failed += 1;
        }
      }
    }

    if report.failed > 0 {
      tracing::debug!(
        synced = report.synced,
        failed = report.failed,
        "Cache reconciliation finished with failures"
      );
    } else if report.synced > 0 {
      tracing::debug!(synced = report.synced, "Cache reconciliation finished");
    }
    report
  }

  /// Synthesize `failure_threshold` failures and enter fallback mode.
  pub fn force_fallback(&self, reason: Option<&str>) -> Mode {
    let reason = reason.unwrap_or("manual fallback requested");
    for _ in 0..self.config.fallback.failure_threshold {
      self.monitor.record_failure(Operation::ManualFallback, reason);
    }
    self.enter_fallback(reason);
    self.mode()
  }

  /// Clear counters and events. The mode is left as is.
  pub fn reset_counters(&self) {
    self.monitor.reset_counters();
    tracing::info!("Cache counters reset");
  }

  fn tier_health(&self) -> TierHealth {
    TierHealth {
      remote: self.remote.as_ref().map(|_| self.monitor.remote_healthy()),
      local: true,
      persistent: self.persistent.as_ref().map(|p| p.is_healthy()),
    }
  }

  pub async fn status(&self) -> CacheStatus {
    let persistent = match &self.persistent {
      Some(p) => match p.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
          tracing::warn!(error = %e, "Failed to read persistent cache stats");
          None
        }
      },
      None => None,
    };

    let mode = self.mode();
    let mut stats = self.monitor.stats();
    stats.remote_healthy = self.monitor.remote_healthy();

    CacheStatus {
      mode,
      fallback_active: mode.is_fallback(),
      tiers: self.tier_health(),
      stats,
      local: self.local.stats(),
      persistent,
    }
  }

  pub fn health(&self) -> HealthSummary {
    self.monitor.health_summary(self.is_fallback())
  }

  pub async fn metrics(&self) -> CacheMetrics {
    CacheMetrics {
      status: self.status().await,
      recent_events: self.monitor.recent_events(METRICS_EVENT_LIMIT),
      timestamp: Utc::now(),
    }
  }

  pub fn events(&self, limit: usize) -> Vec<Event> {
    self.monitor.recent_events(limit)
  }

  /// Write, read, check and delete a throwaway key through the full path.
  pub async fn self_test(&self, ctx: &OpContext) -> Result<SelfTestReport, CacheError> {
    let test_key = format!("cache_test_{}", Utc::now().format("%Y%m%d%H%M%S%3f"));
    let value = SelfTestValue {
      test: true,
      timestamp: Utc::now(),
      message: "Cache test successful".into(),
    };

    let started = Instant::now();
    self.set_json(ctx, &test_key, &value, SELF_TEST_TTL).await?;
    let set = timing(started);

    let started = Instant::now();
    let read: SelfTestValue = self.get_json(ctx, &test_key).await?;
    let get = timing(started);

    let started = Instant::now();
    let exists = self.exists(ctx, &test_key).await?;
    let exists_check = timing(started);

    let started = Instant::now();
    self.delete(ctx, &test_key).await?;
    let delete = timing(started);

    Ok(SelfTestReport {
      success: true,
      test_key,
      set,
      get,
      value_matches: read == value,
      exists_check,
      exists,
      delete,
    })
  }
}

fn timing(started: Instant) -> StepTiming {
  StepTiming {
    success: true,
    duration_ms: started.elapsed().as_secs_f64() * 1000.0,
  }
}
