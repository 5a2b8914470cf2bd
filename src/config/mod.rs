//! Pool configuration: polling cadence, store backoff, per-task defaults, and
//! the retry policy.
//!
//! [`PoolConfig`] is built with chained setters in the same way as
//! [`SubmitOptions`](crate::pool::SubmitOptions):
//!
//! ```
//! use std::time::Duration;
//! use taskpool::config::{PoolConfig, RetryPolicy};
//!
//! let config = PoolConfig::new()
//!     .poll_interval(Duration::from_millis(50))
//!     .default_timeout(Duration::from_secs(60))
//!     .retry(RetryPolicy::exponential(Duration::from_millis(200), Duration::from_secs(5)));
//!
//! assert_eq!(config.default_max_retries, 3);
//! ```

use std::time::Duration;

/// Idle wait between empty claims.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// First backoff step after a store failure in the worker loop.
const DEFAULT_STORE_BACKOFF: Duration = Duration::from_secs(1);

/// Ceiling for the doubling store backoff.
const DEFAULT_MAX_STORE_BACKOFF: Duration = Duration::from_secs(30);

/// Handler deadline used when a submission does not set one (300 s).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// `max_retries` stamped on submissions that do not set one.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// What happens to a task whose handler fails or times out.
///
/// The default, [`RetryPolicy::Disabled`], keeps `retry_count` and
/// `max_retries` as plain bookkeeping: a failed task stays `FAILED`.
///
/// With [`RetryPolicy::Exponential`] a failure while
/// `retry_count < max_retries` puts the task back to `PENDING`, increments
/// `retry_count`, and re-indexes it after `base * 2^(retry_count - 1)`
/// capped at `max`. Tasks with no registered handler are never retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    #[default]
    Disabled,
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    /// Shorthand for [`RetryPolicy::Exponential`].
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential { base, max }
    }

    /// Returns the delay before attempt number `retry_count` (1-based), or
    /// `None` when retries are disabled.
    ///
    /// ```
    /// use std::time::Duration;
    /// use taskpool::config::RetryPolicy;
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(350));
    /// assert_eq!(policy.delay(1), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay(2), Some(Duration::from_millis(200)));
    /// assert_eq!(policy.delay(3), Some(Duration::from_millis(350)));
    /// assert_eq!(RetryPolicy::Disabled.delay(1), None);
    /// ```
    pub fn delay(&self, retry_count: u32) -> Option<Duration> {
        match *self {
            Self::Disabled => None,
            Self::Exponential { base, max } => {
                let exp = retry_count.saturating_sub(1).min(31);
                let delay = base.saturating_mul(1u32 << exp);
                Some(delay.min(max))
            }
        }
    }

    /// Returns `true` unless retries are disabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Settings shared by the manager and all of its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// How long an idle worker sleeps after finding the queue empty.
    pub poll_interval: Duration,
    /// First backoff step after a store error in the worker loop.
    pub store_backoff: Duration,
    /// Upper bound for the doubling store backoff.
    pub max_store_backoff: Duration,
    /// Handler deadline for submissions that do not set one.
    pub default_timeout: Duration,
    /// `max_retries` for submissions that do not set one.
    pub default_max_retries: u32,
    /// What happens to a task whose handler fails or times out.
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            store_backoff: DEFAULT_STORE_BACKOFF,
            max_store_backoff: DEFAULT_MAX_STORE_BACKOFF,
            default_timeout: DEFAULT_TIMEOUT,
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry: RetryPolicy::Disabled,
        }
    }
}

impl PoolConfig {
    /// Creates a config with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long an idle worker waits before polling an empty queue again.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the initial and maximum backoff after store errors.
    pub fn store_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.store_backoff = initial;
        self.max_store_backoff = max.max(initial);
        self
    }

    /// Sets the handler deadline for submissions without their own timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets `max_retries` for submissions that do not choose one.
    pub fn default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets the [`RetryPolicy`].
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Next store backoff step: doubles `current`, capped at `max_store_backoff`.
    pub(crate) fn next_store_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_store_backoff)
    }
}
