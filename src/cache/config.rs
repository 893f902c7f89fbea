use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ConfigError;
use super::Tier;
use crate::db::sanitize::validate_identifier;

/// Tuning parameters for a [`CacheManager`](super::CacheManager).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub local: LocalConfig,
  #[serde(default)]
  pub persistent: PersistentConfig,
  #[serde(default)]
  pub monitor: MonitorConfig,
}

/// Fallback state machine and background worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
  /// Run the health-check worker (required for automatic recovery)
  #[serde(default = "default_true")]
  pub enable_fallback: bool,

  #[serde(default = "default_health_check_interval_secs")]
  pub health_check_interval_secs: u64,

  /// Consecutive remote failures that switch the manager to fallback mode
  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,

  /// Consecutive successful health probes that restore normal mode
  #[serde(default = "default_recovery_threshold")]
  pub recovery_threshold: u32,

  /// Upper bound for a single remote call in milliseconds
  #[serde(default = "default_fallback_timeout_ms")]
  pub fallback_timeout_ms: u64,

  #[serde(default = "default_sync_interval_secs")]
  pub sync_interval_secs: u64,

  /// Run the reconciliation worker
  #[serde(default = "default_true")]
  pub enable_data_sync: bool,

  #[serde(default = "default_true")]
  pub log_fallback_events: bool,

  /// TTL applied to writes that pass a zero TTL
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: u64,

  /// TTL for values mirrored into the local tier when the source reports none
  #[serde(default = "default_mirror_ttl_secs")]
  pub mirror_ttl_secs: u64,
}

fn default_true() -> bool {
  true
}
fn default_health_check_interval_secs() -> u64 {
  30
}
fn default_failure_threshold() -> u32 {
  3
}
fn default_recovery_threshold() -> u32 {
  2
}
fn default_fallback_timeout_ms() -> u64 {
  5000
}
fn default_sync_interval_secs() -> u64 {
  60
}
fn default_ttl_secs() -> u64 {
  24 * 60 * 60
}
fn default_mirror_ttl_secs() -> u64 {
  60 * 60
}

impl Default for FallbackConfig {
  fn default() -> Self {
    Self {
      enable_fallback: true,
      health_check_interval_secs: default_health_check_interval_secs(),
      failure_threshold: default_failure_threshold(),
      recovery_threshold: default_recovery_threshold(),
      fallback_timeout_ms: default_fallback_timeout_ms(),
      sync_interval_secs: default_sync_interval_secs(),
      enable_data_sync: true,
      log_fallback_events: true,
      default_ttl_secs: default_ttl_secs(),
      mirror_ttl_secs: default_mirror_ttl_secs(),
    }
  }
}

impl FallbackConfig {
  pub fn health_check_interval(&self) -> Duration {
    Duration::from_secs(self.health_check_interval_secs)
  }

  pub fn fallback_timeout(&self) -> Duration {
    Duration::from_millis(self.fallback_timeout_ms)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync_interval_secs)
  }

  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }

  pub fn mirror_ttl(&self) -> Duration {
    Duration::from_secs(self.mirror_ttl_secs)
  }
}

/// Remote (Redis protocol) tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_remote_url")]
  pub url: String,
  #[serde(default = "default_pool_size")]
  pub pool_size: usize,
}

fn default_remote_url() -> String {
  "redis://127.0.0.1:6379".into()
}
fn default_pool_size() -> usize {
  10
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      url: default_remote_url(),
      pool_size: default_pool_size(),
    }
  }
}

/// In-process tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
  #[serde(default = "default_max_entries")]
  pub max_entries: usize,
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
}

fn default_max_entries() -> usize {
  10_000
}
fn default_sweep_interval_secs() -> u64 {
  5 * 60
}

impl Default for LocalConfig {
  fn default() -> Self {
    Self {
      max_entries: default_max_entries(),
      sweep_interval_secs: default_sweep_interval_secs(),
    }
  }
}

impl LocalConfig {
  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }
}

/// Relational tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_table")]
  pub table: String,
  #[serde(default = "default_purge_interval_secs")]
  pub purge_interval_secs: u64,
}

fn default_table() -> String {
  "cache_entries".into()
}
fn default_purge_interval_secs() -> u64 {
  10 * 60
}

impl Default for PersistentConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      table: default_table(),
      purge_interval_secs: default_purge_interval_secs(),
    }
  }
}

impl PersistentConfig {
  pub fn purge_interval(&self) -> Duration {
    Duration::from_secs(self.purge_interval_secs)
  }
}

/// Health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
  #[serde(default = "default_stats_interval_secs")]
  pub stats_interval_secs: u64,
  #[serde(default = "default_event_capacity")]
  pub event_capacity: usize,
  /// Error ratio above which overall health is reported as unhealthy
  #[serde(default = "default_unhealthy_error_ratio")]
  pub unhealthy_error_ratio: f64,
}

fn default_stats_interval_secs() -> u64 {
  10
}
fn default_event_capacity() -> usize {
  1000
}
fn default_unhealthy_error_ratio() -> f64 {
  0.2
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      stats_interval_secs: default_stats_interval_secs(),
      event_capacity: default_event_capacity(),
      unhealthy_error_ratio: default_unhealthy_error_ratio(),
    }
  }
}

impl MonitorConfig {
  pub fn stats_interval(&self) -> Duration {
    Duration::from_secs(self.stats_interval_secs)
  }
}

impl CacheConfig {
  /// Reject settings the manager cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let f = &self.fallback;
    positive(f.failure_threshold as u64, "fallback.failure_threshold")?;
    positive(f.recovery_threshold as u64, "fallback.recovery_threshold")?;
    positive(f.fallback_timeout_ms, "fallback.fallback_timeout_ms")?;
    positive(f.default_ttl_secs, "fallback.default_ttl_secs")?;
    positive(f.mirror_ttl_secs, "fallback.mirror_ttl_secs")?;
    if f.enable_fallback {
      positive(
        f.health_check_interval_secs,
        "fallback.health_check_interval_secs",
      )?;
    }
    if f.enable_data_sync {
      positive(f.sync_interval_secs, "fallback.sync_interval_secs")?;
    }

    positive(self.local.max_entries as u64, "local.max_entries")?;
    positive(self.local.sweep_interval_secs, "local.sweep_interval_secs")?;

    if self.remote.enabled {
      if self.remote.url.trim().is_empty() {
        return Err(ConfigError::MissingSetting("remote.url", Tier::Remote));
      }
      positive(self.remote.pool_size as u64, "remote.pool_size")?;
    }

    if self.persistent.enabled {
      validate_identifier(&self.persistent.table)
        .map_err(|_| ConfigError::InvalidTableName(self.persistent.table.clone()))?;
      positive(
        self.persistent.purge_interval_secs,
        "persistent.purge_interval_secs",
      )?;
    }

    positive(self.monitor.stats_interval_secs, "monitor.stats_interval_secs")?;
    positive(self.monitor.event_capacity as u64, "monitor.event_capacity")?;
    let ratio = self.monitor.unhealthy_error_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
      return Err(ConfigError::RatioOutOfRange {
        field: "monitor.unhealthy_error_ratio",
        value: ratio.to_string(),
      });
    }

    Ok(())
  }
}

fn positive(value: u64, field: &'static str) -> Result<(), ConfigError> {
  if value == 0 {
    Err(ConfigError::NotPositive { field })
  } else {
    Ok(())
  }
}
