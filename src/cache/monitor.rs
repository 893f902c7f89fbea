//! Operation counters, the event log and derived health.
//!
//! The failure streak counts consecutive qualifying remote failures and is
//! cleared only by a successful health probe. The probe streak counts
//! consecutive successful probes and drives recovery out of fallback mode.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::config::MonitorConfig;
use super::types::Tier;

/// Tag identifying the operation an event or counter update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
  HealthCheck,
  RemoteGet,
  RemoteSet,
  RemoteDelete,
  RemoteExists,
  LocalSet,
  LocalDelete,
  PersistentGet,
  PersistentSet,
  PersistentDelete,
  PersistentExists,
  /// A write that no tier accepted
  AllSet,
  ManualFallback,
}

impl Operation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::HealthCheck => "health_check",
      Self::RemoteGet => "remote_get",
      Self::RemoteSet => "remote_set",
      Self::RemoteDelete => "remote_delete",
      Self::RemoteExists => "remote_exists",
      Self::LocalSet => "local_set",
      Self::LocalDelete => "local_delete",
      Self::PersistentGet => "persistent_get",
      Self::PersistentSet => "persistent_set",
      Self::PersistentDelete => "persistent_delete",
      Self::PersistentExists => "persistent_exists",
      Self::AllSet => "all_set",
      Self::ManualFallback => "manual_fallback",
    }
  }

  /// Failures that extend the failure streak.
  fn counts_toward_streak(&self) -> bool {
    matches!(
      self,
      Self::HealthCheck
        | Self::RemoteGet
        | Self::RemoteSet
        | Self::RemoteExists
        | Self::ManualFallback
    )
  }

  fn marks_remote_unhealthy(&self) -> bool {
    matches!(self, Self::HealthCheck | Self::RemoteGet | Self::RemoteSet)
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  Hit,
  Miss,
  Success,
  Failure,
  FallbackEnabled,
  FallbackDisabled,
}

impl EventKind {
  pub fn is_transition(&self) -> bool {
    matches!(self, Self::FallbackEnabled | Self::FallbackDisabled)
  }
}

/// Entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  #[serde(rename = "type")]
  pub kind: EventKind,
  pub operation: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,
  /// Error text, or the reason for a mode transition
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<u64>,
}

impl Event {
  fn new(kind: EventKind, operation: impl Into<String>) -> Self {
    Self {
      kind,
      operation: operation.into(),
      key: None,
      error: None,
      timestamp: Utc::now(),
      duration_ms: None,
    }
  }
}

/// Aggregate of the counters, recomputed periodically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
  pub hit_count: u64,
  pub miss_count: u64,
  pub error_count: u64,
  pub success_count: u64,
  pub failure_count: u64,
  pub probe_success_count: u64,
  /// hits / (hits + misses)
  pub hit_ratio: f64,
  /// errors / (successes + errors)
  pub error_ratio: f64,
  pub remote_healthy: bool,
  /// Mode transitions within the last hour
  pub fallback_events: usize,
  pub last_updated: DateTime<Utc>,
}

impl Default for StatsSnapshot {
  fn default() -> Self {
    Self {
      hit_count: 0,
      miss_count: 0,
      error_count: 0,
      success_count: 0,
      failure_count: 0,
      probe_success_count: 0,
      hit_ratio: 0.0,
      error_ratio: 0.0,
      remote_healthy: true,
      fallback_events: 0,
      last_updated: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Degraded,
  Unhealthy,
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Healthy => f.write_str("healthy"),
      Self::Degraded => f.write_str("degraded"),
      Self::Unhealthy => f.write_str("unhealthy"),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
  pub overall_health: HealthStatus,
  pub remote_healthy: bool,
  pub hit_ratio: f64,
  pub error_ratio: f64,
  pub fallback_active: bool,
  /// Failures and fallback activations among the last ten events
  pub critical_events: Vec<Event>,
  pub last_updated: DateTime<Utc>,
}

const CRITICAL_EVENT_WINDOW: usize = 10;
const TRANSITION_WINDOW_HOURS: i64 = 1;

pub struct Monitor {
  hits: AtomicU64,
  misses: AtomicU64,
  successes: AtomicU64,
  errors: AtomicU64,
  failure_streak: AtomicU64,
  probe_streak: AtomicU64,
  remote_healthy: AtomicBool,
  events: RwLock<VecDeque<Event>>,
  event_capacity: usize,
  unhealthy_error_ratio: f64,
  snapshot: RwLock<StatsSnapshot>,
}

impl Monitor {
  pub fn new(config: &MonitorConfig) -> Self {
    let event_capacity = config.event_capacity.max(1);
    Self {
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
      successes: AtomicU64::new(0),
      errors: AtomicU64::new(0),
      failure_streak: AtomicU64::new(0),
      probe_streak: AtomicU64::new(0),
      remote_healthy: AtomicBool::new(true),
      events: RwLock::new(VecDeque::with_capacity(event_capacity)),
      event_capacity,
      unhealthy_error_ratio: config.unhealthy_error_ratio,
      snapshot: RwLock::new(StatsSnapshot::default()),
    }
  }

  pub fn record_hit(&self, tier: Tier) {
    self.hits.fetch_add(1, Ordering::Relaxed);
    self.push_event(Event::new(EventKind::Hit, tier.as_str()));
  }

  pub fn record_miss(&self, key: &str) {
    self.misses.fetch_add(1, Ordering::Relaxed);
    let mut event = Event::new(EventKind::Miss, "get");
    event.key = Some(key.to_string());
    self.push_event(event);
  }

  pub fn record_success(&self, op: Operation) {
    self.success_inner(op, None);
  }

  /// Like [`record_success`](Self::record_success), keeping the elapsed time
  /// on the event.
  pub fn record_timed_success(&self, op: Operation, elapsed: Duration) {
    self.success_inner(op, Some(elapsed));
  }

  fn success_inner(&self, op: Operation, elapsed: Option<Duration>) {
    self.successes.fetch_add(1, Ordering::Relaxed);

    if op == Operation::HealthCheck {
      self.failure_streak.store(0, Ordering::Release);
      self.probe_streak.fetch_add(1, Ordering::AcqRel);
      self.remote_healthy.store(true, Ordering::Release);
    }

    let mut event = Event::new(EventKind::Success, op.as_str());
    event.duration_ms = elapsed.map(|d| d.as_millis() as u64);
    self.push_event(event);
  }

  pub fn record_failure(&self, op: Operation, err: impl fmt::Display) {
    self.errors.fetch_add(1, Ordering::Relaxed);

    if op.counts_toward_streak() {
      self.failure_streak.fetch_add(1, Ordering::AcqRel);
      self.probe_streak.store(0, Ordering::Release);
    }
    if op.marks_remote_unhealthy() {
      self.remote_healthy.store(false, Ordering::Release);
    }

    let mut event = Event::new(EventKind::Failure, op.as_str());
    event.error = Some(err.to_string());
    self.push_event(event);
  }

  /// Log a mode transition. `kind` should be one of the fallback kinds.
  pub fn record_fallback_event(&self, kind: EventKind, reason: &str) {
    if kind == EventKind::FallbackEnabled {
      self.probe_streak.store(0, Ordering::Release);
    }
    let mut event = Event::new(kind, "fallback");
    event.error = Some(reason.to_string());
    self.push_event(event);
  }

  fn push_event(&self, event: Event) {
    let mut events = self.events.write();
    if events.len() >= self.event_capacity {
      events.pop_back();
    }
    events.push_front(event);
  }

  pub fn failure_count(&self) -> u64 {
    self.failure_streak.load(Ordering::Acquire)
  }

  pub fn probe_success_count(&self) -> u64 {
    self.probe_streak.load(Ordering::Acquire)
  }

  pub fn success_count(&self) -> u64 {
    self.successes.load(Ordering::Relaxed)
  }

  pub fn error_count(&self) -> u64 {
    self.errors.load(Ordering::Relaxed)
  }

  pub fn remote_healthy(&self) -> bool {
    self.remote_healthy.load(Ordering::Acquire)
  }

  /// Last computed snapshot.
  pub fn stats(&self) -> StatsSnapshot {
    self.snapshot.read().clone()
  }

  /// Newest first. A `limit` of zero returns the whole log.
  pub fn recent_events(&self, limit: usize) -> Vec<Event> {
    let events = self.events.read();
    let take = if limit == 0 { events.len() } else { limit };
    events.iter().take(take).cloned().collect()
  }

  /// Recompute the snapshot from the live counters.
  pub fn refresh_stats(&self) -> StatsSnapshot {
    let hit_count = self.hits.load(Ordering::Relaxed);
    let miss_count = self.misses.load(Ordering::Relaxed);
    let error_count = self.errors.load(Ordering::Relaxed);
    let success_count = self.successes.load(Ordering::Relaxed);

    let snapshot = StatsSnapshot {
      hit_count,
      miss_count,
      error_count,
      success_count,
      failure_count: self.failure_count(),
      probe_success_count: self.probe_success_count(),
      hit_ratio: ratio(hit_count, hit_count + miss_count),
      error_ratio: ratio(error_count, success_count + error_count),
      remote_healthy: self.remote_healthy(),
      fallback_events: self.count_recent_transitions(),
      last_updated: Utc::now(),
    };

    *self.snapshot.write() = snapshot.clone();
    snapshot
  }

  fn count_recent_transitions(&self) -> usize {
    let cutoff = Utc::now() - chrono::Duration::hours(TRANSITION_WINDOW_HOURS);
    self
      .events
      .read()
      .iter()
      .take_while(|e| e.timestamp >= cutoff)
      .filter(|e| e.kind.is_transition())
      .count()
  }

  /// Zero every counter and clear the log. Remote health is kept.
  pub fn reset_counters(&self) {
    self.hits.store(0, Ordering::Relaxed);
    self.misses.store(0, Ordering::Relaxed);
    self.successes.store(0, Ordering::Relaxed);
    self.errors.store(0, Ordering::Relaxed);
    self.failure_streak.store(0, Ordering::Release);
    self.probe_streak.store(0, Ordering::Release);
    self.events.write().clear();
    self.refresh_stats();
  }

  pub fn health_summary(&self, fallback_active: bool) -> HealthSummary {
    let stats = self.stats();
    let remote_healthy = self.remote_healthy();

    let overall_health = if stats.error_ratio > self.unhealthy_error_ratio {
      HealthStatus::Unhealthy
    } else if !remote_healthy {
      HealthStatus::Degraded
    } else {
      HealthStatus::Healthy
    };

    let critical_events = self
      .recent_events(CRITICAL_EVENT_WINDOW)
      .into_iter()
      .filter(|e| matches!(e.kind, EventKind::Failure | EventKind::FallbackEnabled))
      .collect();

    HealthSummary {
      overall_health,
      remote_healthy,
      hit_ratio: stats.hit_ratio,
      error_ratio: stats.error_ratio,
      fallback_active,
      critical_events,
      last_updated: Utc::now(),
    }
  }
}

fn ratio(part: u64, total: u64) -> f64 {
  if total == 0 {
    0.0
  } else {
    part as f64 / total as f64
  }
}
