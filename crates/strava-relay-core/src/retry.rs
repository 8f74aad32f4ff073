//! # Retry Policy Module
//!
//! Exponential backoff with jitter for transient handler failures (Strava
//! 5xx and 429 responses, timeouts, store hiccups).

use rand::Rng;
use std::time::Duration;

/// Backoff schedule for handler attempts
///
/// `max_attempts` counts every call, the first one included. Delay before
/// retry `n` (0-based) is `base_delay * multiplier^n`, capped at `max_delay`,
/// then spread by ±`jitter_percent`.
///
/// # Examples
///
/// ```rust
/// use strava_relay_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(4, Duration::from_millis(500), Duration::from_secs(30));
/// assert_eq!(policy.max_attempts, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Spread as a fraction of the delay; `0.0` disables jitter.
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Disable jitter (tests and deterministic schedules)
    pub fn without_jitter(mut self) -> Self {
        self.jitter_percent = 0.0;
        self
    }

    /// Set jitter percentage (clamped to 0.0..=1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Delay before retry number `retry` (0-based).
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter_percent > 0.0 && capped > 0.0 {
            let spread = capped * self.jitter_percent;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Delay before retry `retry`, stretched to a server hint when one is given.
    ///
    /// Hints longer than `max_delay` are capped.
    pub fn delay_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let computed = self.calculate_delay(retry);
        match hint {
            Some(hint) => computed.max(hint.min(self.max_delay)),
            None => computed,
        }
    }
}

/// Attempt counter for one retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far (the first call counts).
    pub attempts: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self { attempts: 1 }
    }

    pub fn next_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Whether another attempt is allowed under `policy`.
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempts < policy.max_attempts
    }

    /// Delay before the next attempt.
    pub fn next_delay(&self, policy: &RetryPolicy, hint: Option<Duration>) -> Duration {
        policy.delay_with_hint(self.attempts.saturating_sub(1), hint)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
