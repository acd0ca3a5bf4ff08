//! Retry policy shared by every provider call.
//!
//! A [`RetryPolicy`] bounds how many attempts one provider gets within a
//! single routed call and how long to wait between them. The delay for
//! attempt `n` (zero-based) is `min(base * 2^n, max_delay)` plus a uniform
//! jitter in `[0, max_jitter]`.
//!
//! Errors decide for themselves whether another attempt makes sense through
//! [`RelayError::retry_decision`]. A [`CallBudget`] carries the caller's
//! outer deadline and cancellation token; both abort the in-flight attempt
//! and any pending backoff sleep.
//!
//! ## Example
//!
//! ```no_run
//! use relay_core::recovery::{retry_with_policy, CallBudget, RetryPolicy};
//! use relay_core::RelayError;
//!
//! # async fn demo() {
//! let policy = RetryPolicy::default();
//! let outcome = retry_with_policy(&policy, &CallBudget::unbounded(), |_attempt| async {
//!     Err::<String, _>(RelayError::provider("deepseek", "connection reset"))
//! })
//! .await;
//! assert_eq!(outcome.attempts, 3);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

/// What the retry loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back off and try the same provider again.
    Retry,
    /// Give up on this provider immediately.
    FailFast,
}

/// Bounded exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per provider, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each later attempt.
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy without any waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Exponential part of the delay after `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full delay after `attempt` failed, jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let mut rng = rand::rng();
            Duration::from_secs_f64(rng.random_range(0.0..=self.max_jitter.as_secs_f64()))
        };
        self.backoff(attempt) + jitter
    }

    /// Worst-case total sleep across all attempts.
    pub fn max_total_backoff(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.backoff(attempt) + self.max_jitter)
            .sum()
    }
}

/// Outer limits a caller places on one routed call.
#[derive(Debug, Clone, Default)]
pub struct CallBudget {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallBudget {
    /// A budget with no deadline and no cancellation.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Give up once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up once `timeout` has elapsed from now.
    ///
    /// A timeout too large to represent as an instant sets no deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Give up once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why no further attempt may start, if the budget is spent.
    pub fn exhausted(&self) -> Option<RelayError> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(RelayError::cancelled("cancelled by caller"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(RelayError::cancelled("deadline exceeded"));
        }
        None
    }

    /// Drive `fut` to completion unless the budget runs out first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = cancelled => Err(RelayError::cancelled("cancelled by caller")),
            _ = expired => Err(RelayError::cancelled("deadline exceeded")),
        }
    }

    /// Sleep for `delay`, cut short by cancellation or the deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

/// Result of a retry loop with metadata about the attempts.
#[derive(Debug)]
pub struct RetryResult<T> {
    /// The final result (success or last error).
    pub result: T,
    /// Number of attempts started.
    pub attempts: u32,
    /// Total time spent, backoff included.
    pub total_duration: Duration,
}

/// Run `operation` under `policy`, stopping early on fail-fast errors or
/// when `budget` runs out.
///
/// The closure receives the zero-based attempt number.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    budget: &CallBudget,
    mut operation: F,
) -> RetryResult<Result<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        if let Some(err) = budget.exhausted() {
            return RetryResult {
                result: Err(err),
                attempts,
                total_duration: start.elapsed(),
            };
        }

        let attempt = attempts;
        attempts += 1;

        let err = match budget.run(operation(attempt)).await {
            Ok(value) => {
                if attempts > 1 {
                    info!(
                        attempts,
                        total_ms = start.elapsed().as_millis() as u64,
                        "operation succeeded after retry"
                    );
                }
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(err) => err,
        };

        let give_up = matches!(err, RelayError::Cancelled { .. })
            || err.retry_decision() == RetryDecision::FailFast
            || attempts >= max_attempts;
        if give_up {
            if attempts >= max_attempts && err.retry_decision() == RetryDecision::Retry {
                warn!(
                    attempts,
                    max_attempts,
                    error = %err,
                    "operation failed after all retries"
                );
            }
            return RetryResult {
                result: Err(err),
                attempts,
                total_duration: start.elapsed(),
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed, retrying with backoff"
        );

        if let Err(cancelled) = budget.sleep(delay).await {
            return RetryResult {
                result: Err(cancelled),
                attempts,
                total_duration: start.elapsed(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(40), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_jitter: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_max_total_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
        };
        // 1+1 after the first failure, 2+1 after the second
        assert_eq!(policy.max_total_backoff(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = retry_with_policy(&fast_policy(3), &CallBudget::unbounded(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RelayError::timeout("deepseek", Duration::from_secs(60)))
            }
        })
        .await;

        assert!(outcome.result.unwrap_err().is_timeout());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let outcome = retry_with_policy(&fast_policy(3), &CallBudget::unbounded(), |attempt| async move {
            if attempt == 0 {
                Err(RelayError::provider("deepseek", "connection reset"))
            } else {
                Ok("OK")
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), "OK");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_after_one_attempt() {
        let outcome = retry_with_policy(&fast_policy(3), &CallBudget::unbounded(), |_| async {
            Err::<(), _>(RelayError::RateLimited {
                provider: "deepseek".into(),
                retry_after_secs: None,
            })
        })
        .await;

        assert!(matches!(outcome.result, Err(RelayError::RateLimited { .. })));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_pending_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            max_jitter: Duration::ZERO,
        };
        let budget = CallBudget::unbounded().with_timeout(Duration::from_secs(5));

        let outcome = retry_with_policy(&policy, &budget, |_| async {
            Err::<(), _>(RelayError::provider("deepseek", "boom"))
        })
        .await;

        assert!(matches!(outcome.result, Err(RelayError::Cancelled { .. })));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_in_flight_attempt() {
        let token = CancellationToken::new();
        let budget = CallBudget::unbounded().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let outcome = retry_with_policy(&fast_policy(3), &budget, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, RelayError>("late")
        })
        .await;
        canceller.await.unwrap();

        assert!(matches!(outcome.result, Err(RelayError::Cancelled { .. })));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_spent_budget_starts_no_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let budget = CallBudget::unbounded().with_cancellation(token);

        let outcome = retry_with_policy(&fast_policy(3), &budget, |_| async { Ok::<_, RelayError>(1) }).await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_huge_timeout_means_no_deadline() {
        let budget = CallBudget::unbounded().with_timeout(Duration::from_secs(u64::MAX));
        assert!(budget.deadline().is_none());
        assert!(budget.exhausted().is_none());

        let outcome = retry_with_policy(&fast_policy(1), &budget, |_| async { Ok::<_, RelayError>(7) }).await;
        assert_eq!(outcome.result.unwrap(), 7);
    }
}
