//! Retry policy with bounded exponential backoff
//!
//! Every storage call made by the Ledger Store runs through [`RetryPolicy::run`].
//! Only errors whose [`Retryable::is_transient`] returns true are retried; all
//! others surface after a single attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Retryable, StorageError};

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,

    /// Growth factor applied to the delay after every retry
    pub multiplier: f64,

    /// Jitter as a fraction of the current delay (0.1 = ±10%)
    pub randomization_factor: f64,

    /// Upper bound for a single delay
    pub max_interval: Duration,

    /// Total time budget across all attempts
    pub max_elapsed_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self { max_elapsed_time: Duration::ZERO, ..Default::default() }
    }

    /// Start a fresh backoff schedule.
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff { policy: self, current: self.initial_interval, started: Instant::now() }
    }

    /// Validate the policy
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("retry multiplier must be >= 1.0, got {}", self.multiplier));
        }

        if !(0.0..1.0).contains(&self.randomization_factor) {
            return Err(format!(
                "retry randomization factor must be in [0, 1), got {}",
                self.randomization_factor
            ));
        }

        if self.initial_interval > self.max_interval {
            return Err("retry initial interval exceeds max interval".to_string());
        }

        Ok(())
    }

    /// Run `operation`, retrying transient failures until the elapsed budget runs out.
    ///
    /// Cancellation never interrupts an attempt in flight. Once `cancel` fires no
    /// further attempt is scheduled and the last error is returned; if it fired
    /// before the first attempt, [`StorageError::Cancelled`] is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable + From<StorageError> + std::fmt::Display,
    {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled.into());
        }

        let mut backoff = self.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(err);
            };

            tracing::debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient storage error, retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Backoff state for one call
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    current: Duration,
    started: Instant,
}

impl Backoff<'_> {
    /// Next randomized delay, or `None` once the elapsed budget would be exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = randomize(self.current, self.policy.randomization_factor);

        if self.started.elapsed() + delay > self.policy.max_elapsed_time {
            return None;
        }

        let grown = self.current.as_secs_f64() * self.policy.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.policy.max_interval.as_secs_f64()));

        Some(delay)
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }

    let secs = interval.as_secs_f64();
    let delta = secs * factor;
    let jittered = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));

    Duration::from_secs_f64(jittered.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn deterministic() -> RetryPolicy {
        RetryPolicy { randomization_factor: 0.0, ..Default::default() }
    }

    #[test]
    fn test_default_policy_matches_ledger_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_interval, Duration::from_millis(50));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.randomization_factor, 0.1);
        assert_eq!(policy.max_interval, Duration::from_secs(1));
        assert_eq!(policy.max_elapsed_time, Duration::from_secs(5));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let shrinking = RetryPolicy { multiplier: 0.5, ..Default::default() };
        assert!(shrinking.validate().is_err());

        for multiplier in [f64::NAN, f64::INFINITY] {
            let unbounded = RetryPolicy { multiplier, ..Default::default() };
            assert!(unbounded.validate().is_err(), "{multiplier}");
        }

        let noisy = RetryPolicy { randomization_factor: 1.5, ..Default::default() };
        assert!(noisy.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_grow_and_cap() {
        let policy = deterministic();
        let mut backoff = policy.backoff();

        let delays: Vec<u128> =
            (0..7).map(|_| backoff.next_delay().unwrap().as_millis()).collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 800, 1000, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_stops_schedule() {
        let policy = deterministic();
        let mut backoff = policy.backoff();

        tokio::time::advance(Duration::from_millis(4_990)).await;
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        for _ in 0..1000 {
            let delay = randomize(Duration::from_millis(100), 0.1).as_secs_f64();
            assert!((0.0899..=0.1101).contains(&delay), "{delay}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_transient_failure_is_bounded() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: std::result::Result<(), StorageError> = policy
            .run(&cancel, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(StorageError::Connection(format!("refused #{n}"))) }
            })
            .await;

        let total = attempts.load(Ordering::SeqCst);
        assert!(total > 1, "expected retries, got {total} attempts");
        assert!(started.elapsed() <= policy.max_elapsed_time);

        // The last attempt's error comes back untouched.
        match result {
            Err(StorageError::Connection(msg)) => assert_eq!(msg, format!("refused #{total}")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), StorageError> = policy
            .run(&cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::UniqueViolation("accounts_pkey".into())) }
            })
            .await;

        assert!(matches!(result, Err(StorageError::UniqueViolation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<u32, StorageError> = policy
            .run(&cancel, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(StorageError::Timeout("slow".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), StorageError> = policy
            .run(&cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt_stops_further_retries() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), StorageError> = policy
            .run(&cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                // Deadline fires while the attempt is in flight.
                cancel.cancel();
                async { Err(StorageError::Connection("reset".into())) }
            })
            .await;

        assert!(matches!(result, Err(StorageError::Connection(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_makes_single_attempt() {
        let policy = RetryPolicy::no_retry();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), StorageError> = policy
            .run(&cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::Connection("down".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
