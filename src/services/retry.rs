//! Retry policy for upstream calls.
//!
//! Classifies outcomes as success, transient or terminal and retries
//! transients with capped exponential backoff plus a small jitter. The
//! policy only decides *whether* to call again; what to do with the final
//! outcome stays with the caller.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::ports::HttpResponse;

/// Retry schedule knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total tries including the first. Must be at least 1.
    pub max_attempts: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Single-attempt config used by the poll loop, which provides its
    /// own retry cadence.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.max_attempts == 0 {
            return Err(GatewayError::InvalidInput(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_wait > self.max_wait {
            return Err(GatewayError::InvalidInput(
                "retry base_wait must not exceed max_wait".to_string(),
            ));
        }
        Ok(())
    }
}

/// How one attempt's outcome feeds back into the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    Transient,
    Terminal,
}

/// Classify a completed attempt.
///
/// Transport and timeout failures are transient, as are upstream
/// 502/503/504 and the throttling statuses 408/429. Every other non-2xx
/// is terminal and returned to the caller verbatim.
fn classify(outcome: &GatewayResult<HttpResponse>) -> Disposition {
    match outcome {
        Ok(resp) if resp.is_success() => Disposition::Success,
        Ok(resp) => match resp.status {
            502 | 503 | 504 | 408 | 429 => Disposition::Transient,
            _ => Disposition::Terminal,
        },
        Err(err) if err.is_transient() => Disposition::Transient,
        Err(_) => Disposition::Terminal,
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before attempt `n + 1` (0-based `n` of the attempt that just
    /// failed): `min(base * 2^n, max)` plus up to 10% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_wait
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.config.max_wait);
        let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
        capped + jitter
    }

    /// Run `op` until it succeeds, fails terminally, or attempts are
    /// exhausted. The last outcome is returned either way: a terminal or
    /// exhausted-transient HTTP response comes back as `Ok` for the
    /// caller to interpret, while a final transport-level failure is the
    /// surfaced error.
    pub async fn execute<F, Fut>(&self, op: F) -> GatewayResult<HttpResponse>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<HttpResponse>>,
    {
        let mut outcome = op().await;

        for attempt in 0..self.config.max_attempts.saturating_sub(1) {
            match classify(&outcome) {
                Disposition::Success | Disposition::Terminal => return outcome,
                Disposition::Transient => {
                    let wait = self.backoff(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "transient upstream failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    outcome = op().await;
                }
            }
        }

        outcome
    }
}
