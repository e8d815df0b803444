//! Exponential backoff for idempotent storage and registry operations.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors that can tell a transient failure from a definite one.
pub trait Transient {
  fn is_transient(&self) -> bool;
}

/// How often and how patiently to retry a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub attempts: u32,
  /// Delay before the second attempt; doubles after each failure.
  pub base_delay_ms: u64,
  /// Upper bound for a single delay.
  pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      base_delay_ms: 200,
      max_delay_ms: 5_000,
    }
  }
}

impl RetryPolicy {
  /// A policy that makes exactly one attempt.
  pub fn none() -> Self {
    Self {
      attempts: 1,
      base_delay_ms: 0,
      max_delay_ms: 0,
    }
  }

  /// Delay to wait after the given failed attempt (1-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
  }

  /// Run `op` until it succeeds, fails definitely, or attempts run out.
  pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
  where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let attempts = self.attempts.max(1);
    let mut attempt = 1;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_transient() && attempt < attempts => {
          let delay = self.delay_for(attempt);
          warn!(operation = what, attempt, error = %err, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[derive(Debug)]
  enum TestError {
    Flaky,
    Fatal,
  }

  impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{:?}", self)
    }
  }

  impl Transient for TestError {
    fn is_transient(&self) -> bool {
      matches!(self, TestError::Flaky)
    }
  }

  fn fast() -> RetryPolicy {
    RetryPolicy {
      attempts: 3,
      base_delay_ms: 1,
      max_delay_ms: 2,
    }
  }

  #[test]
  fn delay_doubles_and_caps() {
    let policy = RetryPolicy {
      attempts: 5,
      base_delay_ms: 100,
      max_delay_ms: 350,
    };
    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    assert_eq!(policy.delay_for(90), Duration::from_millis(350));
  }

  #[tokio::test]
  async fn retries_transient_until_success() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, TestError> = fast()
      .run("test", || async {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n < 3 { Err(TestError::Flaky) } else { Ok(n) }
      })
      .await;
    assert_eq!(result.unwrap(), 3);
  }

  #[tokio::test]
  async fn gives_up_after_attempts() {
    let calls = AtomicU32::new(0);
    let result: Result<(), TestError> = fast()
      .run("test", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(TestError::Flaky)
      })
      .await;
    assert!(matches!(result, Err(TestError::Flaky)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn definite_failures_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<(), TestError> = fast()
      .run("test", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(TestError::Fatal)
      })
      .await;
    assert!(matches!(result, Err(TestError::Fatal)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
