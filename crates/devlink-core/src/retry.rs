//! Retry decorator with backoff for transient faults.
//!
//! A [`RetryPolicy`] re-executes a fallible async operation according to a
//! backoff schedule. Whether a failure is retried is decided by a predicate over
//! the error; the default predicate is [`Error::is_transient`], so timeouts,
//! busy devices, and failed connections are retried while everything else
//! propagates on first occurrence.
//!
//! The policy holds no per-call state: every [`RetryPolicy::execute`] call
//! counts its own attempts, so one policy can be shared by many devices.
//!
//! # Schedule
//!
//! With `max_retries = n` the operation runs at most `n` times. The delay
//! before retry `k` (1-indexed) is `base_delay * 2^(k-1)` with exponential
//! backoff, or `base_delay` otherwise, capped at `max_delay`.
//!
//! ```
//! use devlink_core::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(100)).exponential(true);
//! assert_eq!(policy.delay_for(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(200));
//! ```

use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Predicate deciding whether a failure should be retried.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Backoff-based retry decorator.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    exponential_backoff: bool,
    max_delay: Duration,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl RetryPolicy {
    /// Create a policy with a constant delay and the transient-fault predicate.
    ///
    /// `max_retries` is the total number of attempts and is clamped to at least 1.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            exponential_backoff: false,
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            predicate: Arc::new(Error::is_transient),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Enable or disable exponential backoff.
    pub fn exponential(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Cap any single delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Replace the retry predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Total number of attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Whether delays double after each retry.
    pub fn is_exponential(&self) -> bool {
        self.exponential_backoff
    }

    /// Whether the policy would retry this failure (ignoring the attempt budget).
    pub fn should_retry(&self, error: &Error) -> bool {
        (self.predicate)(error)
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = if self.exponential_backoff {
            let factor = 1u32
                .checked_shl(retry.saturating_sub(1))
                .unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        };
        delay.min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// The closure receives the 1-indexed attempt number. The wrapped operation
    /// is never dropped mid-flight; cancellation is checked before each attempt
    /// and while waiting between attempts, and the operation is expected to
    /// honor the same token at its own I/O boundaries.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires before or between attempts
    /// - the original error, unchanged, when the predicate rejects it
    /// - [`Error::RetryExhausted`] carrying the attempt count and last cause
    ///   when every attempt failed with a retryable error
    pub async fn execute<T, F, Fut>(&self, mut operation: F, cancel: &CancellationToken) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error.is_cancelled() || !self.should_retry(&error) {
                return Err(error);
            }

            if attempt >= self.max_retries {
                warn!(attempts = attempt, error = %error, "Retry budget exhausted");
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Serializable retry settings.
///
/// # Example
///
/// ```
/// use devlink_core::{RetryConfig, RetryPolicy};
///
/// let config: RetryConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
/// let policy = RetryPolicy::from(config);
/// assert_eq!(policy.max_retries(), 5);
/// assert!(policy.is_exponential());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts (at least 1).
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Double the delay after each retry.
    pub exponential_backoff: bool,

    /// Upper bound on a single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            exponential_backoff: true,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        RetryPolicy::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
            .exponential(config.exponential_backoff)
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionFaultKind, DeviceFaultKind};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::connection_timeout("tcp://10.0.0.5:9000", 100)
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay(), Duration::from_millis(100));
        assert!(policy.is_exponential());
    }

    #[test]
    fn test_max_retries_clamped() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_retries(), 1);
    }

    #[test]
    fn test_constant_delay() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1))
            .exponential(true)
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn prop_exponential_schedule(base_ms in 1u64..1000, retry in 1u32..12) {
            let policy = RetryPolicy::new(20, Duration::from_millis(base_ms))
                .exponential(true)
                .with_max_delay(Duration::from_secs(24 * 3600));
            let expected = Duration::from_millis(base_ms * (1u64 << (retry - 1)));
            prop_assert_eq!(policy.delay_for(retry), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100)).exponential(true);
        let cancel = CancellationToken::new();
        let mut attempt_times = Vec::new();

        let result = policy
            .execute(
                |attempt| {
                    attempt_times.push(Instant::now());
                    async move {
                        if attempt < 3 {
                            Err(transient())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                &cancel,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempt_times.len(), 3);
        assert_eq!(attempt_times[1] - attempt_times[0], Duration::from_millis(100));
        assert_eq!(attempt_times[2] - attempt_times[1], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_cause() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::device(DeviceFaultKind::Busy, "printer-1", "busy")) }
                },
                &cancel,
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *source,
                    Error::Device {
                        kind: DeviceFaultKind::Busy,
                        ..
                    }
                ));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_propagates_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::invalid_state("cam-1", "get_info", "NotInitialized")) }
                },
                &cancel,
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(Error::connection(
                            ConnectionFaultKind::NotFound,
                            "serial:///dev/ttyUSB9",
                            "no such port",
                        ))
                    }
                },
                &cancel,
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_checked_between_attempts() {
        let policy = RetryPolicy::new(5, Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    cancel.cancel();
                    async { Err(transient()) }
                },
                &cancel,
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_delay() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result: Result<()> = policy.execute(|_| async { Err(transient()) }, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let policy = RetryPolicy::new(4, Duration::ZERO).with_predicate(|_| false);
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(transient()) }
                },
                &cancel,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_config_deserialize_partial() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"base_delay_ms": 250, "exponential_backoff": false}"#)
                .unwrap();
        let policy = RetryPolicy::from(config);
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }
}
