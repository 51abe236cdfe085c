use std::{fmt::Display, future::Future, time::Duration};

use tokio::time::{sleep, timeout};

use crate::config::ModerationConfig;

use super::errors::{AnalysisError, SimilarityError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ModerationConfig) -> Self {
        Self {
            call_timeout: config.call_timeout,
            max_retries: config.max_retries,
            initial_backoff: config.retry_backoff,
        }
    }

    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable: Display {
    fn is_transient(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for AnalysisError {
    fn is_transient(&self) -> bool {
        match self {
            AnalysisError::Upstream(err) => err.is_transient(),
            AnalysisError::Timeout(_) => true,
            AnalysisError::Malformed(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        AnalysisError::Timeout(after)
    }
}

impl Retryable for SimilarityError {
    fn is_transient(&self) -> bool {
        match self {
            SimilarityError::Upstream(err) => err.is_transient(),
            SimilarityError::Timeout(_) => true,
            SimilarityError::Corpus(_)
            | SimilarityError::NonNumeric(_)
            | SimilarityError::OutOfRange(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        SimilarityError::Timeout(after)
    }
}

/// Runs `op` under the policy's timeout, retrying transient failures with
/// exponential backoff. The last error is returned once retries run out.
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    call: &'static str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let result = match timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(target: "engine", call, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let backoff = policy.backoff_for_attempt(attempt);
                tracing::warn!(
                    target: "engine",
                    call,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient failure, will retry"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(target: "engine", call, error = %err, "all retries exhausted");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(50),
            max_retries,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_secs(1),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_surfaced() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AnalysisError> = call_with_retry(&policy(2), "analysis", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                sleep(Duration::from_millis(200)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(AnalysisError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_responses_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AnalysisError> = call_with_retry(&policy(5), "analysis", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AnalysisError::Malformed("not json".into())) }
        })
        .await;

        assert!(matches!(result, Err(AnalysisError::Malformed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_when_a_later_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<f64, SimilarityError> = call_with_retry(&policy(2), "similarity", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(SimilarityError::Timeout(Duration::from_millis(1)))
                } else {
                    Ok(0.25)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 0.25);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
