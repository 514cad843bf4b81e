//! Bounded retry with backoff
//!
//! One primitive shared by every injection task. The operation decides per
//! attempt whether a failure is worth retrying; the policy decides how many
//! attempts there are and how long to wait between them.

use stagehand_common::params::{BackoffStrategy, EngineParams, TaskOverride};
use std::future::Future;
use std::time::Duration;

/// Attempt budget and delay schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub strategy: BackoffStrategy,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff capped at five seconds
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            strategy: BackoffStrategy::Linear,
            max_backoff: Duration::from_secs(5),
        }
    }

    pub fn from_params(params: &EngineParams) -> Self {
        Self {
            max_attempts: params.default_max_attempts.max(1),
            backoff: params.default_backoff(),
            strategy: params.backoff_strategy,
            max_backoff: params.max_backoff(),
        }
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Apply the configured per-task override on top of this policy
    pub fn with_override(mut self, task_override: &TaskOverride) -> Self {
        if let Some(max_attempts) = task_override.max_attempts {
            self.max_attempts = max_attempts.max(1);
        }
        if let Some(backoff_ms) = task_override.backoff_ms {
            self.backoff = Duration::from_millis(backoff_ms);
        }
        if let Some(strategy) = task_override.strategy {
            self.strategy = strategy;
        }
        self
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.strategy.delay(self.backoff, attempt, self.max_backoff)
    }
}

/// Failure of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// Wait per policy and try again
    Retry(E),
    /// Stop now; further attempts cannot help
    Abort(E),
}

/// Why `run_with_backoff` gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error
    Exhausted { attempts: u32, last: E },
    /// The operation aborted on attempt `attempt`
    Aborted { attempt: u32, error: E },
}

/// Run `operation` until it succeeds, aborts, or the attempt budget is spent
///
/// `operation` receives the 1-based attempt number. The delay after attempt
/// `n` is `policy.delay_after(n)`; no delay follows the last attempt.
pub async fn run_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(AttemptError::Abort(error)) => {
                return Err(RetryError::Aborted { attempt, error });
            }
            Err(AttemptError::Retry(error)) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }

                let delay = policy.delay_after(attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_linear_schedule_and_exhaustion() {
        let start = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let policy = RetryPolicy::new(4, Duration::from_millis(100));

        let log = seen.clone();
        let result: Result<(), _> = run_with_backoff("test", &policy, |attempt| {
            log.lock().unwrap().push((attempt, start.elapsed().as_millis()));
            async { Err(AttemptError::Retry("nope")) }
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 4,
                last: "nope"
            })
        );
        // Waits of 100, 200, 300 ms between attempts
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 0), (2, 100), (3, 300), (4, 600)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let policy = RetryPolicy::new(10, Duration::from_millis(50));
        let result = run_with_backoff("test", &policy, |attempt| async move {
            if attempt < 3 {
                Err(AttemptError::Retry(format!("attempt {}", attempt)))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_skips_remaining_attempts() {
        let start = Instant::now();
        let policy = RetryPolicy::new(10, Duration::from_millis(50));
        let result: Result<(), _> = run_with_backoff("test", &policy, |attempt| async move {
            if attempt == 2 {
                Err(AttemptError::Abort("stale"))
            } else {
                Err(AttemptError::Retry("later"))
            }
        })
        .await;
        assert_eq!(
            result,
            Err(RetryError::Aborted {
                attempt: 2,
                error: "stale"
            })
        );
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[test]
    fn test_override_replaces_only_given_fields() {
        let base = RetryPolicy::from_params(&EngineParams::default());
        let tuned = base.with_override(&TaskOverride {
            max_attempts: Some(6),
            backoff_ms: None,
            strategy: Some(BackoffStrategy::Exponential),
        });
        assert_eq!(tuned.max_attempts, 6);
        assert_eq!(tuned.backoff, base.backoff);
        assert_eq!(tuned.strategy, BackoffStrategy::Exponential);
        assert_eq!(tuned.max_backoff, base.max_backoff);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts, 1);
        let policy = policy.with_override(&TaskOverride {
            max_attempts: Some(0),
            ..TaskOverride::default()
        });
        assert_eq!(policy.max_attempts, 1);
    }
}
