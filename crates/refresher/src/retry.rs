//! Shared retry and polling policy values.
//!
//! Every retrying component receives its budget as an explicit policy value
//! instead of hard-coding nested backoff loops.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Budget for re-running a whole operation after a failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before each re-attempt. With `exponential`, the delay doubles
    /// per attempt (backoff, 2*backoff, 4*backoff, ...).
    pub backoff: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    /// Delay applied before re-attempt number `attempt` (1-indexed re-runs).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.backoff;
        }
        // Checked shift so misconfigured attempt counts saturate instead of
        // overflowing the multiplier.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(multiplier)
            .unwrap_or(Duration::from_secs(u64::from(u32::MAX)))
    }
}

/// Cadence for polling an external resource a bounded number of times.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

/// Outcome of a single attempt inside [`retry_with_backoff`].
pub enum RetryAction<T, E> {
    Success(T),
    /// Transient failure; retry if budget remains.
    Retry(E),
    /// Permanent failure; stop immediately.
    Fail(E),
}

/// Execute an async operation under a [`RetryPolicy`].
///
/// The closure receives the 0-indexed attempt number. Cancellation is
/// checked before each attempt and while sleeping between attempts; a
/// cancelled run surfaces the error produced by `on_cancel`.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    on_cancel: impl Fn() -> E,
    operation: F,
) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err: Option<E> = None;

    for attempt in 0..policy.max_attempts {
        if token.is_cancelled() {
            return Err(on_cancel());
        }

        if attempt > 0 {
            let delay = policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = token.cancelled() => return Err(on_cancel()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    error = %err,
                    "attempt failed"
                );
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(on_cancel))
}

/// Classify a reqwest error as retryable (transient) or not.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
