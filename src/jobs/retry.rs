//! Retry policy with exponential backoff and jitter
//!
//! Only errors that report themselves retryable are retried; everything
//! else fails on the first attempt.

use crate::error::PipelineError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    #[serde(with = "serde_duration_millis")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "serde_duration_millis")]
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Errors that may be worth another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        PipelineError::is_retryable(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Max retries ({0}) exceeded: {1}")]
    MaxRetriesExceeded(u32, E),
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxRetriesExceeded(_, e) | RetryError::OperationFailed(e) => e,
        }
    }
}

impl From<RetryError<PipelineError>> for PipelineError {
    fn from(err: RetryError<PipelineError>) -> Self {
        err.into_inner()
    }
}

/// Execute a future with retry logic
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(RetryError::OperationFailed(e)),
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    warn!("Max retries ({}) reached: {}", config.max_retries, e);
                    return Err(RetryError::MaxRetriesExceeded(config.max_retries, e));
                }

                let delay = calculate_backoff(backoff, config.jitter);

                warn!(
                    "Retry attempt {}/{} after error: {}, waiting {:?}",
                    attempt, config.max_retries, e, delay
                );

                tokio::time::sleep(delay).await;

                backoff = Duration::from_millis(
                    ((backoff.as_millis() as f64 * config.backoff_multiplier)
                        .min(config.max_backoff.as_millis() as f64)) as u64,
                );
            }
        }
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_upstream_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast(), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(PipelineError::UpstreamUnavailable("event store".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = with_retry(&fast(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::UpstreamUnavailable("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::MaxRetriesExceeded(2, _))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = with_retry(&fast(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::NotFound("pattern".into())) }
        })
        .await;

        let err = result.unwrap_err().into_inner();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let d = calculate_backoff(base, true);
            assert!(d >= Duration::from_millis(700) && d <= Duration::from_millis(1300));
        }
        assert_eq!(calculate_backoff(base, false), base);
    }
}
