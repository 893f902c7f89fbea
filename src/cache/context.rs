use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::CacheError;

/// Per-call deadline and cancellation.
///
/// The manager checks the context before touching each tier and races it
/// against every async tier call.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
  deadline: Option<Instant>,
  token: Option<CancellationToken>,
}

impl OpContext {
  /// No deadline, never cancelled.
  pub fn background() -> Self {
    Self::default()
  }

  pub fn with_timeout(timeout: Duration) -> Self {
    Self::background().deadline(Instant::now() + timeout)
  }

  pub fn deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn cancel_on(mut self, token: CancellationToken) -> Self {
    self.token = Some(token);
    self
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.as_ref().is_some_and(|t| t.is_cancelled())
  }

  /// Fail fast if the context has already fired.
  pub fn check(&self) -> Result<(), CacheError> {
    if self.is_cancelled() {
      return Err(CacheError::Cancelled);
    }
    if self.deadline.is_some_and(|d| Instant::now() >= d) {
      return Err(CacheError::DeadlineExceeded);
    }
    Ok(())
  }

  /// Drive `fut` until it completes or the context fires.
  pub async fn run<F>(&self, fut: F) -> Result<F::Output, CacheError>
  where
    F: Future,
  {
    self.check()?;

    let cancelled = async {
      match &self.token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
      }
    };
    let expired = async {
      match self.deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
      }
    };

    tokio::select! {
      biased;
      _ = cancelled => Err(CacheError::Cancelled),
      _ = expired => Err(CacheError::DeadlineExceeded),
      out = fut => Ok(out),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_background_runs_to_completion() {
    let ctx = OpContext::background();
    assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
  }

  #[tokio::test]
  async fn test_cancelled_token_stops_call() {
    let token = CancellationToken::new();
    let ctx = OpContext::background().cancel_on(token.clone());
    token.cancel();

    assert!(matches!(ctx.check(), Err(CacheError::Cancelled)));
    let result = ctx.run(std::future::pending::<()>()).await;
    assert!(matches!(result, Err(CacheError::Cancelled)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_deadline_interrupts_slow_call() {
    let ctx = OpContext::with_timeout(Duration::from_millis(50));
    let result = ctx
      .run(tokio::time::sleep(Duration::from_secs(10)))
      .await;
    assert!(matches!(result, Err(CacheError::DeadlineExceeded)));
  }
}
