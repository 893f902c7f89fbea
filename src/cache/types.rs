use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// TTL applied when a caller passes a zero TTL. There are no permanent entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest lifetime any tier accepts. Larger TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// One of the stores the manager can read from or write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
  Remote,
  Local,
  Persistent,
}

impl Tier {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Remote => "remote",
      Self::Local => "local",
      Self::Persistent => "persistent",
    }
  }
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Operating mode of the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  #[default]
  Normal,
  /// Remote tier bypassed; only local and persistent tiers serve requests.
  Fallback,
}

impl Mode {
  pub fn is_fallback(&self) -> bool {
    matches!(self, Self::Fallback)
  }
}

impl fmt::Display for Mode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Normal => f.write_str("normal"),
      Self::Fallback => f.write_str("fallback"),
    }
  }
}

/// Replace a zero TTL with `default` and clamp the result to [`MAX_TTL`].
pub fn normalize_ttl(ttl: Duration, default: Duration) -> Duration {
  let ttl = if ttl.is_zero() { default } else { ttl };
  ttl.min(MAX_TTL)
}
