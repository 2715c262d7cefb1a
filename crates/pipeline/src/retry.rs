//! Timeout, bounded retry and cancellation around external calls.
//!
//! Every external call goes through [`CallRunner::call`]: one pool permit per
//! attempt, a timeout per attempt, exponential backoff between transient
//! failures, and an early exit when the job's [`CancellationToken`] fires.
//! An abandoned call is dropped, not force-terminated.

use std::future::Future;
use std::time::Duration;

use storyreel_core::services::ServiceError;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::pool::WorkerPool;

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// A successful call together with the attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Shared settings for external calls.
#[derive(Debug, Clone)]
pub struct CallRunner {
    pool: WorkerPool,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CallRunner {
    pub fn new(pool: WorkerPool, retry: RetryPolicy, timeout: Duration) -> Self {
        Self { pool, retry, timeout }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// A timed-out attempt counts as [`ServiceError::Timeout`] and is retried
    /// like any transient error. Cancellation yields [`ServiceError::Cancelled`].
    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        label: &str,
        mut op: F,
    ) -> Result<Attempted<T>, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                result = self.attempt(&mut op) => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(call = label, attempt, "External call succeeded after retry");
                    }
                    return Ok(Attempted { value, attempts: attempt });
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                tracing::warn!(
                    call = label,
                    attempt,
                    error = %err,
                    "External call failed, giving up",
                );
                return Err(err);
            }

            tracing::warn!(
                call = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "External call failed, retrying",
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.retry);
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &mut F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let _permit = self.pool.acquire().await.map_err(|_| ServiceError::Cancelled)?;
        match tokio::time::timeout(self.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(self.timeout)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
