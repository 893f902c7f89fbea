//! Tiered cache with automatic fallback.
//!
//! [`CacheManager`] routes every operation across a remote tier (shared
//! Redis-protocol service), a bounded in-process tier and a relational
//! persistent tier. Repeated remote failures switch it to fallback mode,
//! where the remote tier is bypassed; consecutive successful health probes
//! switch it back.

pub mod config;
mod context;
mod error;
mod local;
mod manager;
mod monitor;
mod persistent;
mod remote;
mod types;
mod workers;

pub use config::{
  CacheConfig, FallbackConfig, LocalConfig, MonitorConfig, PersistentConfig, RemoteConfig,
};
pub use context::OpContext;
pub use error::{CacheError, ConfigError, TierErrors};
pub use local::{LocalCache, LocalStats, PeekedEntry};
pub use manager::{
  CacheManager, CacheManagerBuilder, CacheMetrics, CacheStatus, SelfTestReport, StepTiming,
  SyncReport, TierHealth,
};
pub use monitor::{
  Event, EventKind, HealthStatus, HealthSummary, Monitor, Operation, StatsSnapshot,
};
pub use persistent::PersistentCache;
pub use remote::{RedisRemote, RemoteCache, RemoteError, RemoteValue};
pub use types::{normalize_ttl, Mode, Tier, DEFAULT_TTL, MAX_TTL};
