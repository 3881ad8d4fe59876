//! Error ledger records.
//!
//! Every classified failure becomes one [`CampaignError`] row. Rows are
//! append-only except for `resolved_at`, which is set once when an operator or
//! the system marks the failure resolved.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Opaque identifier assigned to a ledger row at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorId(Uuid);

impl ErrorId {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ErrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ErrorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A failure about to be recorded; the ledger assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCampaignError {
    pub campaign_id: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub error_details: Option<serde_json::Value>,
    pub step_name: String,
    pub retry_count: u32,
    /// Ceiling in effect for `error_kind` when the failure was classified.
    pub max_retries: u32,
    pub can_auto_resume: bool,
    pub created_at: DateTime<Utc>,
}

impl NewCampaignError {
    /// Attaches the assigned id, producing an open ledger row.
    pub fn into_record(self, id: ErrorId) -> CampaignError {
        CampaignError {
            id,
            campaign_id: self.campaign_id,
            error_kind: self.error_kind,
            error_message: self.error_message,
            error_details: self.error_details,
            step_name: self.step_name,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            can_auto_resume: self.can_auto_resume,
            created_at: self.created_at,
            resolved_at: None,
        }
    }
}

/// One row of the `campaign_errors` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignError {
    pub id: ErrorId,
    pub campaign_id: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    pub step_name: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub can_auto_resume: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CampaignError {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Sets `resolved_at` unless already set. Returns true if this call resolved it.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> bool {
        if self.resolved_at.is_some() {
            return false;
        }
        self.resolved_at = Some(now);
        true
    }
}

/// Sorts rows newest first.
///
/// `errors` must be in insertion order; rows sharing a timestamp end up
/// latest-inserted first.
pub fn sort_newest_first(errors: &mut [CampaignError]) {
    errors.reverse();
    errors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Aggregate view of a campaign's ledger for operators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    /// Errors created in the 24 hours before the summary was taken.
    pub last_24h: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub open_by_kind: BTreeMap<ErrorKind, usize>,
    /// Share of resolved errors (0.0 - 1.0); 0.0 when there are none.
    pub resolution_rate: f64,
}

impl ErrorSummary {
    pub fn from_errors(errors: &[CampaignError], now: DateTime<Utc>) -> Self {
        let day_ago = now - Duration::hours(24);
        let mut summary = ErrorSummary {
            total: errors.len(),
            ..Default::default()
        };

        for error in errors {
            *summary.by_kind.entry(error.error_kind).or_default() += 1;
            if error.is_open() {
                summary.open += 1;
                *summary.open_by_kind.entry(error.error_kind).or_default() += 1;
            } else {
                summary.resolved += 1;
            }
            if error.created_at >= day_ago {
                summary.last_24h += 1;
            }
        }

        if summary.total > 0 {
            summary.resolution_rate = summary.resolved as f64 / summary.total as f64;
        }
        summary
    }
}
