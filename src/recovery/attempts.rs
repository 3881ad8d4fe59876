//! Per-step attempt counters.

use std::collections::HashMap;

use crate::error::ErrorKind;

/// Composite key for an attempt streak.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub campaign_id: String,
    pub step_name: String,
    pub kind: ErrorKind,
}

impl AttemptKey {
    pub fn new(campaign_id: impl Into<String>, step_name: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            step_name: step_name.into(),
            kind,
        }
    }
}

/// Attempt counts keyed by `(campaign, step, kind)`.
///
/// Not synchronized: one owner per campaign at a time.
#[derive(Debug, Clone, Default)]
pub struct AttemptCounters {
    counts: HashMap<AttemptKey, u32>,
}

impl AttemptCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and returns the new 1-based attempt number.
    pub fn increment(&mut self, key: AttemptKey) -> u32 {
        let count = self.counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Current count, 0 when the streak is clean.
    pub fn get(&self, key: &AttemptKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Clears every kind's counter for one `(campaign, step)` pair.
    ///
    /// Returns how many counters were dropped.
    pub fn reset_step(&mut self, campaign_id: &str, step_name: &str) -> usize {
        let before = self.counts.len();
        self.counts
            .retain(|key, _| !(key.campaign_id == campaign_id && key.step_name == step_name));
        before - self.counts.len()
    }

    /// Clears all counters of a campaign.
    pub fn reset_campaign(&mut self, campaign_id: &str) -> usize {
        let before = self.counts.len();
        self.counts.retain(|key, _| key.campaign_id != campaign_id);
        before - self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
