//! Bounded exponential backoff with jitter.
//!
//! The wrapper retries on *any* failure: the sink's transient and permanent
//! errors are indistinguishable to the caller holding an idempotency token,
//! and resubmitting an already-applied token is a no-op by contract.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Backoff schedule for retried operations.
///
/// The delay before attempt `n` is `base × multiplier^(n-2)`, scaled by a
/// jitter factor drawn uniformly from [1.0, 2.0) and capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(20),
            multiplier: 1.2,
            max_delay: Duration::from_millis(60),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Jittered, capped delay to wait before attempt `attempt` (1-based).
    fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jitter = 1.0 + rand::random::<f64>();
        Duration::from_secs_f64(raw * jitter).min(self.max_delay)
    }
}

/// A successful result together with its retry telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// How many attempts it took, the successful one included.
    pub attempts: u32,
    /// Observed wall time slept between the first failure and the last
    /// attempt. The first attempt itself contributes nothing.
    pub total_delay: Duration,
}

/// The last failure after the policy ran out of attempts.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
    pub total_delay: Duration,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.error)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Run `operation`, retrying any failure under `policy`.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<Retried<T>, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 1;
    let mut total_delay = Duration::ZERO;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "operation succeeded after retry");
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                    total_delay,
                });
            }
            Err(error) => {
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempt, "retries exhausted: {error}");
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt,
                        total_delay,
                    });
                }

                let delay = policy.delay_before(attempt + 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, backing off: {error}"
                );
                let waited = Instant::now();
                tokio::time::sleep(delay).await;
                total_delay += waited.elapsed();
                attempt += 1;
            }
        }
    }
}
