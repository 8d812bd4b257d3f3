//! Bounded retry of transient store faults.
//!
//! The orchestrator re-runs a whole operation when it fails with an error the
//! policy's predicate accepts. The default predicate accepts only transient
//! store faults; lock conflicts and decided transactions are business
//! outcomes and are returned to the caller on the first attempt.

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to randomize delays.
    pub add_jitter: bool,
    /// Wall-clock ceiling across all attempts.
    pub max_elapsed: Option<Duration>,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
            max_elapsed: Some(Duration::from_secs(30)),
        }
    }

    /// Creates a configuration with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            max_elapsed: None,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Sets the wall-clock ceiling.
    #[must_use]
    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// With jitter, the delay is drawn uniformly from half to all of the
    /// exponential value.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            Duration::from_secs_f64(delay_secs * factor)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

type RetryPredicate = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

/// Backoff configuration plus the predicate deciding which errors to retry.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Backoff schedule.
    pub config: RetryConfig,
    predicate: RetryPredicate,
}

impl RetryPolicy {
    /// Creates a policy retrying [`CoreError::is_retryable`] errors.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::new(CoreError::is_retryable),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn never() -> Self {
        Self::new(RetryConfig::no_retry())
    }

    /// Replaces the retry predicate.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&CoreError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Returns true if `error` should be retried.
    #[must_use]
    pub fn should_retry(&self, error: &CoreError) -> bool {
        (self.predicate)(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt or wall-clock budget runs out. `op` receives the 0-based attempt.
    ///
    /// # Errors
    ///
    /// Returns the last error from `op`, or [`CoreError::Cancelled`] if the
    /// token is cancelled before an attempt.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> CoreResult<T>) -> CoreResult<T> {
        let config = &self.policy.config;
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            self.cancel.check()?;

            let error = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let next = attempt + 1;
            if next >= config.max_attempts || !self.policy.should_retry(&error) {
                return Err(error);
            }

            let delay = config.delay_for_attempt(next);
            if let Some(max_elapsed) = config.max_elapsed {
                if started.elapsed() + delay > max_elapsed {
                    warn!(attempt, error = %error, "retry budget exhausted");
                    return Err(error);
                }
            }

            debug!(attempt = next, delay_ms = delay.as_millis() as u64, error = %error, "retry scheduled");
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_storage::StoreError;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts)
            .with_initial_delay(Duration::ZERO)
            .with_jitter(false)
    }

    #[test]
    fn no_retry_config() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max_and_jitter_bounds() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        for _ in 0..20 {
            let delay = config.delay_for_attempt(5);
            assert!(delay <= Duration::from_secs(5));
            assert!(delay >= Duration::from_millis(2500));
        }
    }

    #[test]
    fn retries_transient_faults_then_succeeds() {
        let orchestrator = RetryOrchestrator::new(RetryPolicy::new(fast(5)), CancellationToken::new());
        let calls = Cell::new(0);
        let result = orchestrator.run(|_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::throttled("busy").into())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn never_retries_conflicts() {
        let orchestrator = RetryOrchestrator::new(RetryPolicy::new(fast(5)), CancellationToken::new());
        let calls = Cell::new(0);
        let result: CoreResult<()> = orchestrator.run(|_| {
            calls.set(calls.get() + 1);
            Err(CoreError::Conflicted {
                transaction_id: "t".into(),
                conflicts: Vec::new(),
            })
        });
        assert!(matches!(result, Err(CoreError::Conflicted { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let orchestrator = RetryOrchestrator::new(RetryPolicy::new(fast(3)), CancellationToken::new());
        let calls = Cell::new(0);
        let result: CoreResult<()> = orchestrator.run(|attempt| {
            assert_eq!(attempt, calls.get());
            calls.set(calls.get() + 1);
            Err(StoreError::unavailable("down").into())
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn custom_predicate() {
        let policy = RetryPolicy::new(fast(4)).with_predicate(|e| matches!(e, CoreError::Cancelled));
        assert!(policy.should_retry(&CoreError::Cancelled));
        assert!(!policy.should_retry(&StoreError::throttled("x").into()));
    }

    #[test]
    fn cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let orchestrator = RetryOrchestrator::new(RetryPolicy::default(), token);
        let result = orchestrator.run(|_| Ok(()));
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
