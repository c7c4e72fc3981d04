//! Bounded polling with exponential backoff.
//!
//! Used to wait for the container to come up instead of sleeping a fixed
//! amount. The total wait is capped; running out of time yields
//! [`HarnessError::ReadinessTimeout`], which is distinct from a container
//! that answered but violated its contract.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::obs::emit_readiness_attempt;

/// Backoff schedule for a readiness poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first unsuccessful attempt (milliseconds).
    pub base_ms: u64,
    /// Upper bound on any single delay (milliseconds).
    pub max_ms: u64,
    /// Upper bound on the whole poll (milliseconds).
    pub total_ms: u64,
}

impl BackoffPolicy {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            base_ms: config.backoff_base_ms,
            max_ms: config.backoff_max_ms,
            total_ms: config.settle_timeout_ms,
        }
    }

    /// Delay to sleep after the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

/// Outcome of a single poll attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Target is up; stop polling.
    Ready(T),
    /// Not yet; keep polling. Carries what was observed.
    Pending(String),
    /// Waiting further cannot help; stop with this error.
    Abort(HarnessError),
}

/// Successful poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
    pub waited_ms: u64,
}

/// Poll `attempt_fn` until it reports ready, aborts, or the policy's total
/// wait is exhausted.
pub async fn poll_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    target: &str,
    mut attempt_fn: F,
) -> HarnessResult<Polled<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let start = Instant::now();
    let total = Duration::from_millis(policy.total_ms);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let observation = match attempt_fn().await {
            Attempt::Ready(value) => {
                return Ok(Polled {
                    value,
                    attempts: attempt,
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            Attempt::Abort(err) => return Err(err),
            Attempt::Pending(observation) => observation,
        };

        let elapsed = start.elapsed();
        if elapsed >= total {
            return Err(HarnessError::ReadinessTimeout {
                waited_ms: elapsed.as_millis() as u64,
                last_observation: format!("{target}: {observation}"),
            });
        }

        let delay = policy.delay_for(attempt).min(total - elapsed);
        emit_readiness_attempt(target, attempt, delay.as_millis() as u64, &observation);
        tokio::time::sleep(delay).await;
    }
}
