//! # Retry Policy Module
//!
//! Backoff schedule used by the ordered retry executor between attempts of an
//! outcome operation that failed transiently.
//!
//! The delay before retry `n` (0-based) is `initial_delay * backoff_multiplier^n`,
//! capped at `max_delay`. When jitter is enabled the capped delay is moved by a
//! random amount of up to `jitter_percent` of itself in either direction.

use rand::Rng;
use std::time::Duration;

/// Jitter fraction applied by [`RetryPolicy::default`] and [`RetryPolicy::new`]
const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff schedule with an attempt budget
///
/// `max_attempts` is the total number of executions of one work item, so the
/// first execution uses one unit of the budget.
///
/// ```rust
/// use ack_dispatch::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // 5 executions, 100ms then doubling up to 2s, with ±25% jitter
/// let standard = RetryPolicy::default();
/// assert_eq!(standard.max_retries(), 4);
///
/// let gentle = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_secs(1), 1.5);
/// assert!(gentle.allows_attempt(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Executions allowed per work item, first one included
    pub max_attempts: u32,

    /// Wait before the first retry
    pub initial_delay: Duration,

    /// Upper bound on any single wait
    pub max_delay: Duration,

    /// Growth factor between consecutive waits
    pub backoff_multiplier: f64,

    /// Randomize waits around the computed value
    pub use_jitter: bool,

    /// Largest jitter as a fraction of the wait, within `0.0..=1.0`
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(2), 2.0)
    }
}

impl RetryPolicy {
    /// Jittered exponential policy
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: DEFAULT_JITTER,
        }
    }

    /// Policy that always waits exactly `delay` between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            use_jitter: false,
            jitter_percent: 0.0,
        }
    }

    pub fn without_jitter(self) -> Self {
        Self {
            use_jitter: false,
            ..self
        }
    }

    /// Replace the jitter fraction, clamped into `0.0..=1.0`; NaN disables jitter
    pub fn with_jitter_percent(self, percent: f64) -> Self {
        let percent = if percent.is_nan() { 0.0 } else { percent };
        Self {
            jitter_percent: percent.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Wait before retry number `retry`, where 0 is the first retry
    ///
    /// ```rust
    /// use ack_dispatch::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default().without_jitter();
    /// assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
    /// assert_eq!(policy.delay_for_retry(3), Duration::from_millis(800));
    /// assert_eq!(policy.delay_for_retry(9), Duration::from_secs(2));
    /// ```
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let ceiling = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let grown = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // A NaN or negative multiplier must not reach Duration conversion
        let bounded = if grown.is_nan() {
            ceiling
        } else {
            grown.clamp(0.0, ceiling)
        };

        let seconds = if self.use_jitter {
            jittered(bounded, self.jitter_percent)
        } else {
            bounded
        };

        Duration::try_from_secs_f64(seconds).unwrap_or(self.max_delay)
    }

    /// Whether a further execution fits the budget after `attempts_made` executions
    pub fn allows_attempt(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Retries left once the first attempt has run
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }
}

/// Uniform sample from `seconds * (1 ± fraction)`, never negative
fn jittered(seconds: f64, fraction: f64) -> f64 {
    let spread = seconds * fraction;
    if !spread.is_finite() || spread <= 0.0 {
        return seconds;
    }

    let offset = rand::thread_rng().gen_range(-spread..=spread);
    (seconds + offset).max(0.0)
}

/// Attempt bookkeeping for the work item currently being executed
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Executions started so far
    pub attempts: u32,

    /// Description of the most recent failure
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Whether `policy` leaves room for another execution
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.allows_attempt(self.attempts)
    }

    /// Wait before the next execution, given the attempts already made
    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.delay_for_retry(self.attempts.saturating_sub(1))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
