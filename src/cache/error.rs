use std::fmt;

use super::Tier;

/// Errors crossing the cache manager's public boundary.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// Key absent or expired on every tier. An expected outcome, not a fault.
  #[error("cache miss: key {key} not found in any cache tier")]
  Miss { key: String },

  /// Every attempted tier failed a write.
  #[error("failed to set cache key {key}: {errors}")]
  AllTiersFailed { key: String, errors: TierErrors },

  /// Some tiers failed a fan-out operation (delete, exists).
  #[error("cache {operation} errors: {errors}")]
  Partial {
    operation: &'static str,
    errors: TierErrors,
  },

  /// A single tier failed.
  #[error("{tier} tier error: {message}")]
  Tier { tier: Tier, message: String },

  #[error("operation cancelled")]
  Cancelled,

  #[error("operation deadline exceeded")]
  DeadlineExceeded,

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl CacheError {
  pub fn is_miss(&self) -> bool {
    matches!(self, Self::Miss { .. })
  }

  /// True when the caller's context stopped the operation.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, Self::Cancelled | Self::DeadlineExceeded)
  }

  pub(crate) fn tier(tier: Tier, err: impl fmt::Display) -> Self {
    Self::Tier {
      tier,
      message: err.to_string(),
    }
  }
}

/// Per-tier failures collected while fanning an operation out.
#[derive(Debug, Default, Clone)]
pub struct TierErrors(Vec<(Tier, String)>);

impl TierErrors {
  pub fn push(&mut self, tier: Tier, err: impl fmt::Display) {
    self.0.push((tier, err.to_string()));
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &(Tier, String)> {
    self.0.iter()
  }

  pub fn contains(&self, tier: Tier) -> bool {
    self.0.iter().any(|(t, _)| *t == tier)
  }
}

impl fmt::Display for TierErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      return write!(f, "no tier attempted");
    }
    for (i, (tier, msg)) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, "; ")?;
      }
      write!(f, "{}: {}", tier, msg)?;
    }
    Ok(())
  }
}

/// Invalid configuration, reported when the manager is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
  #[error("{field} must be positive")]
  NotPositive { field: &'static str },

  #[error("{field} must be within (0, 1], got {value}")]
  RatioOutOfRange { field: &'static str, value: String },

  #[error("{0} tier is enabled in configuration but was not supplied")]
  MissingTier(Tier),

  #[error("{0} is required when the {1} tier is enabled")]
  MissingSetting(&'static str, Tier),

  #[error("invalid table name: {0}")]
  InvalidTableName(String),
}
