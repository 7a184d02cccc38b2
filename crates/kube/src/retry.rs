//! Optimistic-concurrency retries.
//!
//! A conditional write that loses a race against another writer comes back
//! as a conflict. The whole read-modify-write cycle is then run again after a
//! short, growing delay, until it succeeds, fails for another reason, or the
//! attempt budget is spent.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{error, warn};

use crate::error::{ClusterError, Result};

/// How often and how patiently a conflicting write is retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than one.
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied to the delay after every retry
    pub multiplier: f64,
    /// Random extra fraction added on top of each delay, 0.1 adds up to 10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1`, ignoring jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + extra))
    }
}

/// Runs `operation` until it stops reporting conflicts.
///
/// Errors other than a conflict are returned straight away. When every
/// attempt conflicts the result is [`ClusterError::RetriesExhausted`] wrapping
/// the last conflict.
pub async fn retry_on_conflict<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_conflict() => return Err(e),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Conflict persisted after max retries"
                    );
                    return Err(ClusterError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }

                let delay = policy.jittered(policy.backoff(attempt));
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Write conflicted, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
