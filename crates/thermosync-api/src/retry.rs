// ── Retry policy ──
//
// Bounded exponential retry for whole operations (token refresh cycles).
// Per-request retries are the transport's concern, not this module's.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff configuration for retried operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay after the first failure. Default: 1s.
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays. Default: 5.
    pub multiplier: f64,
    /// Upper bound on any single delay. Default: 5 minutes.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 5.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

/// The operation failed on every attempt.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    ///
    /// `delay = min(initial * multiplier^(attempt-1), max)`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Sleeps between attempts, never after the last one.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= max_attempts => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "{label} failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
