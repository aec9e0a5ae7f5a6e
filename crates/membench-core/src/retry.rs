//! Bounded exponential backoff for calls to rate-limited services.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HarnessError, HarnessResult};

/// Retry configuration. `max_retries` is the total attempt budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the second attempt; doubles for every further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff sleep.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Pause after every successful call, to stay under the limiter.
    #[serde(default)]
    pub success_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    120_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            success_delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// A single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            success_delay_ms: 0,
        }
    }

    pub fn with_success_delay(mut self, delay: Duration) -> Self {
        self.success_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sleep before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exp = Duration::from_millis(self.base_delay_ms.saturating_mul(factor));
        let wanted = match retry_after {
            Some(hint) if hint > exp => hint,
            _ => exp,
        };
        wanted.min(Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)))
    }

    /// Run `call` until it succeeds, fails permanently, or the budget is spent.
    pub async fn execute<T, F, Fut, P>(&self, mut call: F, is_retriable: P) -> HarnessResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
        P: Fn(&HarnessError) -> bool,
    {
        let max_attempts = self.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => {
                    if self.success_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.success_delay_ms)).await;
                    }
                    return Ok(value);
                }
                Err(e) if !is_retriable(&e) => return Err(e),
                Err(e) if attempt + 1 >= max_attempts => {
                    warn!(attempts = attempt + 1, error = %e, "retry budget exhausted");
                    return Err(HarnessError::RetryExhausted {
                        attempts: attempt + 1,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff(attempt, e.retry_after());
                    warn!(
                        error = %e,
                        retry = attempt + 1,
                        max_retries = max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        "retrying call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// `execute` with the default transient-error predicate.
    pub async fn run<T, F, Fut>(&self, call: F) -> HarnessResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        self.execute(call, HarnessError::is_transient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> HarnessError {
        HarnessError::RateLimited {
            message: "429".into(),
            retry_after: None,
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_secs(5)).with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.backoff(0, None), Duration::from_secs(5));
        assert_eq!(policy.backoff(1, None), Duration::from_secs(10));
        assert_eq!(policy.backoff(2, None), Duration::from_secs(20));
        assert_eq!(policy.backoff(3, None), Duration::from_secs(30));
        assert_eq!(policy.backoff(63, None), Duration::from_secs(30));
        assert_eq!(
            policy.backoff(0, Some(Duration::from_secs(12))),
            Duration::from_secs(12)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_makes_exactly_max_retries_attempts() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let err = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(rate_limited()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            HarnessError::RetryExhausted { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(source.is_transient());
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let err = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(HarnessError::Service {
                        message: "bad request".into(),
                        status: Some(400),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, HarnessError::Service { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_twice_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(rate_limited())
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 5s + 10s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn success_delay_is_applied() {
        let policy = RetryPolicy::none().with_success_delay(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        policy.run(|| async { Ok(()) }).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_controls_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = AtomicU32::new(0);
        let _ = policy
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(HarnessError::agent("flaky pipe")) }
                },
                |e| matches!(e, HarnessError::Agent { .. }),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
