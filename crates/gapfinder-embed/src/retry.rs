//! Bounded retry with exponential backoff.
//!
//! Transient failures back off `base_delay × 2^attempt`, capped at
//! `max_delay`. Rate-limit failures scale that delay by
//! `rate_limit_multiplier` and cap it at `rate_limit_max_delay`, honouring a
//! server-provided `Retry-After` within the cap. Permanent failures stop
//! immediately. Every call runs under a timeout; a timeout is transient.

use std::future::Future;
use std::time::Duration;

use gapfinder_core::EmbeddingConfig;
use tracing::warn;

use crate::service::ServiceError;

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { error: ServiceError, attempts: u32 },
    /// A permanent error ended the loop early.
    Permanent { error: ServiceError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Permanent { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: f64,
    pub rate_limit_max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_multiplier: config.rate_limit_multiplier,
            rate_limit_max_delay: Duration::from_millis(config.rate_limit_max_delay_ms),
            call_timeout: config.request_timeout(),
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32, error: &ServiceError) -> Duration {
        let factor = 1u32 << attempt.min(20);
        let exponential = self.base_delay.saturating_mul(factor);

        match error {
            ServiceError::RateLimited { retry_after, .. } => {
                let scaled = Duration::from_secs_f64(
                    (exponential.as_secs_f64() * self.rate_limit_multiplier)
                        .min(self.rate_limit_max_delay.as_secs_f64()),
                );
                match retry_after {
                    Some(hint) => scaled.max(*hint).min(self.rate_limit_max_delay),
                    None => scaled,
                }
            }
            _ => exponential.min(self.max_delay),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Transient(format!(
                    "call timed out after {:?}",
                    self.call_timeout
                ))),
            };
            let attempts = attempt + 1;

            match result {
                Ok(value) => return RetryOutcome::Success { value, attempts },
                Err(error) if !error.is_retryable() => {
                    return RetryOutcome::Permanent { error, attempts };
                }
                Err(error) => {
                    if attempts >= self.max_attempts {
                        return RetryOutcome::Exhausted { error, attempts };
                    }
                    let delay = self.backoff(attempt, &error);
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempts, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            rate_limit_multiplier: 2.0,
            rate_limit_max_delay: Duration::from_millis(8),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ..fast_policy(3)
        };
        let err = ServiceError::Transient("boom".into());
        assert_eq!(policy.backoff(0, &err), Duration::from_secs(1));
        assert_eq!(policy.backoff(1, &err), Duration::from_secs(2));
        assert_eq!(policy.backoff(3, &err), Duration::from_secs(8));
        assert_eq!(policy.backoff(10, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_rate_limit_backoff_extended_and_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            rate_limit_multiplier: 2.0,
            rate_limit_max_delay: Duration::from_secs(60),
            ..fast_policy(3)
        };
        let limited = ServiceError::RateLimited {
            retry_after: None,
            message: "slow down".into(),
        };
        assert_eq!(policy.backoff(0, &limited), Duration::from_secs(2));
        assert_eq!(policy.backoff(2, &limited), Duration::from_secs(8));
        assert_eq!(policy.backoff(10, &limited), Duration::from_secs(60));

        let hinted = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(20)),
            message: "slow down".into(),
        };
        assert_eq!(policy.backoff(0, &hinted), Duration::from_secs(20));

        let huge = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
            message: "slow down".into(),
        };
        assert_eq!(policy.backoff(0, &huge), Duration::from_secs(60));

        let saturated = ServiceError::RateLimited {
            retry_after: Some(Duration::MAX),
            message: "slow down".into(),
        };
        assert_eq!(policy.backoff(0, &saturated), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let outcome = fast_policy(3)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ServiceError::Transient("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        match outcome {
            RetryOutcome::Success { value, attempts } => {
                assert_eq!(value, 42);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fast_policy(3)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ServiceError::RateLimited {
                        retry_after: None,
                        message: "429".into(),
                    })
                }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_stops_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fast_policy(5)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::Permanent("bad model".into())) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Permanent { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(10),
            ..fast_policy(2)
        };
        let outcome: RetryOutcome<()> = policy
            .run(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        match outcome {
            RetryOutcome::Exhausted { error, attempts } => {
                assert_eq!(attempts, 2);
                assert!(matches!(error, ServiceError::Transient(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
