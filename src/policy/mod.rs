//! Retry policies keyed by error kind.
//!
//! The table carries, per [`ErrorKind`], the retry ceiling, whether the kind is
//! retried at all, whether a campaign paused on it may resume without a human,
//! and the base delay fed to the [`BackoffCalculator`].

pub mod backoff;

pub use backoff::{BackoffCalculator, FixedJitter, JitterSource, RandomJitter};

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ErrorKind;

/// Retry behavior for one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Highest attempt number that is still retried.
    pub max_retries: u32,
    /// Whether failures of this kind are retried at all.
    pub retryable: bool,
    /// Whether a campaign paused on this kind may resume without a human.
    pub auto_resumable: bool,
    /// Delay before the first retry; doubled on each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// The built-in policy for a kind.
    pub fn default_for(kind: ErrorKind) -> Self {
        let (max_retries, auto_resumable, base_secs) = match kind {
            ErrorKind::ContentGeneration => (3, false, 30),
            ErrorKind::Publishing => (2, false, 15),
            ErrorKind::ApiFailure => (3, true, 10),
            ErrorKind::Network => (5, true, 5),
            ErrorKind::Authentication => (1, false, 60),
            ErrorKind::RateLimit => (10, true, 300),
            ErrorKind::Unknown => (2, false, 20),
        };
        Self {
            max_retries,
            retryable: true,
            auto_resumable,
            base_delay: Duration::from_secs(base_secs),
        }
    }

    /// Whether the given 1-based attempt may be retried.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.retryable && attempt <= self.max_retries
    }
}

/// Retry policies for every [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyTable {
    policies: BTreeMap<ErrorKind, RetryPolicy>,
}

impl Default for RetryPolicyTable {
    fn default() -> Self {
        Self {
            policies: ErrorKind::ALL
                .iter()
                .map(|kind| (*kind, RetryPolicy::default_for(*kind)))
                .collect(),
        }
    }
}

impl RetryPolicyTable {
    /// Creates the table with built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the policy for a kind.
    pub fn get(&self, kind: ErrorKind) -> RetryPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or_else(|| RetryPolicy::default_for(kind))
    }

    /// Replaces the policy for a kind.
    pub fn set(&mut self, kind: ErrorKind, policy: RetryPolicy) {
        self.policies.insert(kind, policy);
    }

    /// Builder form of [`RetryPolicyTable::set`].
    pub fn with_policy(mut self, kind: ErrorKind, policy: RetryPolicy) -> Self {
        self.set(kind, policy);
        self
    }

    /// Iterates over all kinds and their policies.
    pub fn iter(&self) -> impl Iterator<Item = (ErrorKind, RetryPolicy)> + '_ {
        self.policies.iter().map(|(k, p)| (*k, *p))
    }
}
