//! Retry policy for control-plane calls and part uploads.
//!
//! [`RetryPolicy::run`] retries an operation while it fails with a transient
//! error ([`UploadError::is_retryable`]), sleeping according to a
//! [`DelayStrategy`] between attempts. Cancellation is checked before every
//! attempt and again after every delay, so a paused or cancelled session never
//! starts new work.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::UploadError;

/// Default delays between attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 4] = [0, 1_000, 3_000, 5_000];

/// How long to wait after a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DelayStrategy {
    /// A fixed table: the delay after attempt `n` is `delays_ms[n - 1]`; the last
    /// entry repeats once the table runs out.
    #[serde(rename_all = "camelCase")]
    Schedule {
        /// Delays in milliseconds.
        delays_ms: Vec<u64>,
    },
    /// Exponential backoff: `min(initial * multiplier^(n - 1), max)`.
    #[serde(rename_all = "camelCase")]
    Backoff {
        /// Delay after the first failed attempt, in milliseconds.
        initial_delay_ms: u64,
        /// Growth factor per attempt.
        multiplier: f64,
        /// Upper bound for any single delay, in milliseconds.
        max_delay_ms: u64,
    },
}

/// Attempt budget and delay strategy.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ruststack_upload_core::retry::RetrySpec;
///
/// let spec = RetrySpec::default();
/// assert_eq!(spec.max_attempts, 5);
/// assert_eq!(spec.delay_after(2), Duration::from_millis(1_000));
/// assert_eq!(spec.delay_after(9), Duration::from_millis(5_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: DelayStrategy,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self::schedule(DEFAULT_RETRY_DELAYS_MS.to_vec())
    }
}

impl RetrySpec {
    /// A table-driven spec allowing one attempt more than there are delays.
    #[must_use]
    pub fn schedule(delays_ms: Vec<u64>) -> Self {
        let max_attempts = u32::try_from(delays_ms.len())
            .unwrap_or(u32::MAX - 1)
            .saturating_add(1);
        Self {
            max_attempts,
            delay: DelayStrategy::Schedule { delays_ms },
        }
    }

    /// An exponential backoff spec.
    #[must_use]
    pub fn backoff(max_attempts: u32, initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            max_attempts,
            delay: DelayStrategy::Backoff {
                initial_delay_ms: duration_ms(initial),
                multiplier,
                max_delay_ms: duration_ms(max),
            },
        }
    }

    /// A spec that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: DelayStrategy::Schedule {
                delays_ms: Vec::new(),
            },
        }
    }

    /// The delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1);
        match &self.delay {
            DelayStrategy::Schedule { delays_ms } => {
                let ms = delays_ms
                    .get(index as usize)
                    .or_else(|| delays_ms.last())
                    .copied()
                    .unwrap_or(0);
                Duration::from_millis(ms)
            }
            DelayStrategy::Backoff {
                initial_delay_ms,
                multiplier,
                max_delay_ms,
            } => {
                let exponent = i32::try_from(index).unwrap_or(i32::MAX);
                let ms = *initial_delay_ms as f64 * multiplier.powi(exponent);
                if ms.is_finite() && ms < *max_delay_ms as f64 {
                    Duration::from_millis(ms.max(0.0) as u64)
                } else {
                    Duration::from_millis(*max_delay_ms)
                }
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of a retried operation that was not abandoned with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation succeeded.
    Completed(T),
    /// Cancellation was observed before an attempt could start.
    Cancelled,
}

/// Runs operations under a [`RetrySpec`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    spec: RetrySpec,
}

impl RetryPolicy {
    /// Create a policy from `spec`.
    #[must_use]
    pub fn new(spec: RetrySpec) -> Self {
        Self { spec }
    }

    /// The attempt budget and delays in use.
    #[must_use]
    pub fn spec(&self) -> &RetrySpec {
        &self.spec
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `is_cancelled` reports true before an attempt.
    ///
    /// `operation` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error unchanged, or
    /// [`UploadError::RetriesExhausted`] wrapping the last transient error.
    pub async fn run<T, F, Fut, C>(
        &self,
        is_cancelled: C,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, UploadError>
    where
        C: Fn() -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let max_attempts = self.spec.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if is_cancelled() {
                debug!(attempt, "Operation cancelled before attempt");
                return Ok(RetryOutcome::Cancelled);
            }

            match operation(attempt).await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %err, "Retries exhausted");
                    return Err(UploadError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.spec.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = duration_ms(delay),
                        error = %err,
                        "Transient failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
