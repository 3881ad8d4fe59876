//! Exponential backoff with jitter.
//!
//! The delay for attempt `n` (1-based) is `base * 2^(n-1)`, plus uniform
//! jitter of up to `jitter_ratio` of that value, clamped to `max_delay`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::RetryPolicy;

/// Hard ceiling applied to every computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10 * 60);

/// Upper bound of the jitter, as a fraction of the exponential delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.10;

/// Source of jitter samples in `[0, 1]`.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Returns a sample in `[0, 1]`.
    fn sample(&self) -> f64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::rng().random_range(0.0..1.0)
    }
}

/// Always returns the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Computes retry delays.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    /// Ceiling for any delay.
    pub max_delay: Duration,
    /// Jitter bound as a fraction of the exponential delay (0.0 - 1.0).
    pub jitter_ratio: f64,
    jitter: Arc<dyn JitterSource>,
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self {
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            jitter: Arc::new(RandomJitter),
        }
    }
}

impl BackoffCalculator {
    /// Creates a calculator with the default ceiling and jitter ratio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the jitter ratio, clamped to `[0, 1]`.
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Replaces the jitter source.
    pub fn with_jitter_source(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// The exponential delay for an attempt, without jitter, clamped.
    pub fn base_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        Duration::from_millis(self.exponential_millis(policy, attempt).min(self.max_millis()))
    }

    /// The delay to wait before retrying the given 1-based attempt.
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponential = self.exponential_millis(policy, attempt);
        let sample = self.jitter.sample();
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter = (exponential as f64 * self.jitter_ratio * sample) as u64;
        let total = exponential.saturating_add(jitter).min(self.max_millis());
        Duration::from_millis(total)
    }

    fn exponential_millis(&self, policy: &RetryPolicy, attempt: u32) -> u64 {
        let exponent = attempt.max(1).saturating_sub(1).min(31);
        let multiplier = 1u64 << exponent;
        let base_millis = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
        base_millis.saturating_mul(multiplier)
    }

    fn max_millis(&self) -> u64 {
        u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX)
    }
}
