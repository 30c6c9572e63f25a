//! Per-call timeout and retry with configurable backoff for collaborator calls.
//!
//! Stages wrap every external call in [`call_with_retry`]; the executor itself
//! never applies a wall-clock limit.

use std::future::Future;
use std::time::Duration;

use sleuth_types::{CallsConfig, Result, SleuthError};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 2u64.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
                let millis = u64::try_from(base.as_millis())
                    .unwrap_or(u64::MAX)
                    .saturating_mul(factor);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Limits for one external call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
}

impl CallPolicy {
    pub fn from_config(config: &CallsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&CallsConfig::default())
    }
}

/// Run `f` under `policy.timeout`, retrying retryable failures.
///
/// The closure is called up to `max_retries + 1` times. A timed-out attempt
/// counts as a retryable [`SleuthError::CallTimeout`]. A rate-limit error waits
/// at least as long as the provider asked.
pub async fn call_with_retry<T, F, Fut>(operation: &str, policy: &CallPolicy, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=policy.max_retries {
        let result = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(SleuthError::CallTimeout {
                operation: operation.to_string(),
                timeout_ms: policy.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let mut delay = policy.backoff.delay_for_attempt(attempt);
                if let SleuthError::RateLimited { retry_after_ms, .. } = &e {
                    delay = delay.max(Duration::from_millis(*retry_after_ms));
                }
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| SleuthError::Other(format!("{operation}: no attempts made"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: usize) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(5),
            max_retries,
            backoff: BackoffPolicy::None,
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let result = call_with_retry("op", &policy(3), || async { Ok("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn retry_on_retryable_error_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result = call_with_retry("op", &policy(3), move || {
            let cc = cc.clone();
            async move {
                if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SleuthError::RateLimited {
                        provider: "test".into(),
                        retry_after_ms: 0,
                    })
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_retries_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result: Result<()> = call_with_retry("op", &policy(2), move || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(SleuthError::ProviderError {
                    provider: "test".into(),
                    status: 503,
                    message: "unavailable".into(),
                    retryable: true,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(SleuthError::ProviderError { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_no_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result: Result<()> = call_with_retry("op", &policy(5), move || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(SleuthError::AuthError {
                    provider: "test".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(SleuthError::AuthError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let policy = CallPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 1,
            backoff: BackoffPolicy::None,
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result: Result<()> = call_with_retry("generate", &policy, move || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        })
        .await;

        match result {
            Err(SleuthError::CallTimeout {
                operation,
                timeout_ms,
            }) => {
                assert_eq!(operation, "generate");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fixed_backoff_constant_delay() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn exponential_backoff_saturates_at_high_attempts() {
        let policy = BackoffPolicy::default();
        for attempt in [56, 60, 64, 1_000, usize::MAX] {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(30));
        }
    }

    #[test]
    fn policy_from_config() {
        let policy = CallPolicy::from_config(&CallsConfig {
            timeout_secs: 7,
            max_retries: 4,
        });
        assert_eq!(policy.timeout, Duration::from_secs(7));
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.backoff, BackoffPolicy::default());
    }
}
