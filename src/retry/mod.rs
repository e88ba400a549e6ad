/// Exponential backoff with jitter for transient upstream failures
///
/// Pure control flow - the policy holds only its parameters, so concurrent
/// executions share no mutable state. Only errors marked retryable by the
/// taxonomy are retried; everything else propagates immediately.

use crate::errors::{GatewayError, GatewayResult};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempt bound: the operation runs at most this many times
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Run `op`, retrying retryable failures with backoff
    /// `min(base * 2^(attempt-1) * jitter, max)`, jitter in [0.85, 1.15].
    /// A caller-supplied deadline bounds each attempt and the sleeps between
    /// them; when it expires the loop aborts with `Timeout`. After the
    /// attempt bound is exhausted the last error propagates unchanged.
    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: &str,
        deadline: Option<Instant>,
        mut op: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(self.deadline_error(endpoint, d));
                    }
                    match tokio::time::timeout(d - now, op()).await {
                        Ok(result) => result,
                        Err(_) => Err(self.deadline_error(endpoint, d)),
                    }
                }
                None => op().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            if let Some(d) = deadline {
                if Instant::now() + delay >= d {
                    // No room left for another attempt
                    return Err(err);
                }
            }

            log::debug!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempt,
                self.max_attempts,
                endpoint,
                err.kind(),
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.85..=1.15);
        let exp = self.base_delay.as_millis() as f64
            * 2f64.powi(attempt.saturating_sub(1) as i32)
            * jitter;
        Duration::from_millis(exp as u64).min(self.max_delay)
    }

    fn deadline_error(&self, endpoint: &str, deadline: Instant) -> GatewayError {
        GatewayError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: deadline.elapsed().as_millis() as u64,
        }
    }
}
