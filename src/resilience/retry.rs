//! # Retry With Backoff
//!
//! The delay before attempt `n + 1` is `min(max_delay, base_delay * 2^(n-1))`
//! plus up to `jitter_factor` of that delay in random jitter, never
//! exceeding `max_delay`. With `jitter_factor <= 1` successive delays are
//! non-decreasing.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retry
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay after failed attempt `attempt` (1-based), jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter_factor = self.jitter_factor.clamp(0.0, 1.0);
        if jitter_factor == 0.0 {
            return delay;
        }
        let jitter = delay.mul_f64(fastrand::f64() * jitter_factor);
        delay.saturating_add(jitter).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `operation` receives the 1-based attempt number. The last error is
/// returned unchanged.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_hook(policy, operation, |_, _, _| {}).await
}

/// [`retry`] with an observation hook called before each wait with the
/// failed attempt number, its error and the upcoming delay.
pub async fn retry_with_hook<T, E, F, Fut, H>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: H,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(u32, &E, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = policy.delay_for(attempt);
                on_retry(attempt, &err, delay);
                debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "Retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
