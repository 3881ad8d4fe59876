//! Campaign-level auto-resume eligibility.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ErrorKind;
use crate::ledger::CampaignError;

/// Only open errors newer than this are considered.
pub const DEFAULT_RESUME_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Campaign-wide pause suggested while a rate limit is open.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(5 * 60);

/// Tunables for [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeRules {
    pub window: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for ResumeRules {
    fn default() -> Self {
        Self {
            window: DEFAULT_RESUME_WINDOW,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
        }
    }
}

/// Answer to "may this campaign resume without a human?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeEligibility {
    pub can_resume: bool,
    pub reason: Option<String>,
    pub suggested_delay: Option<Duration>,
    /// Kinds of the open errors that require a human, in kind order.
    pub blocking_kinds: Vec<ErrorKind>,
}

impl ResumeEligibility {
    fn clear() -> Self {
        Self {
            can_resume: true,
            reason: None,
            suggested_delay: None,
            blocking_kinds: Vec::new(),
        }
    }
}

/// Decides eligibility from a campaign's open errors.
///
/// Errors older than the window are ignored. Auto-resumability is read from
/// each row, as copied at classification time.
pub fn evaluate(open_errors: &[CampaignError], now: DateTime<Utc>, rules: &ResumeRules) -> ResumeEligibility {
    let cutoff = chrono::Duration::from_std(rules.window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window));

    let recent: Vec<&CampaignError> = open_errors
        .iter()
        .filter(|e| e.is_open())
        .filter(|e| cutoff.map_or(true, |cutoff| e.created_at >= cutoff))
        .collect();

    if recent.is_empty() {
        return ResumeEligibility::clear();
    }

    let mut blocking_kinds: Vec<ErrorKind> = recent
        .iter()
        .filter(|e| !e.can_auto_resume)
        .map(|e| e.error_kind)
        .collect();
    blocking_kinds.sort();
    blocking_kinds.dedup();

    if !blocking_kinds.is_empty() {
        let reasons: Vec<&str> = blocking_kinds.iter().map(|k| k.operator_message()).collect();
        return ResumeEligibility {
            can_resume: false,
            reason: Some(reasons.join("; ")),
            suggested_delay: None,
            blocking_kinds,
        };
    }

    if recent.iter().any(|e| e.error_kind == ErrorKind::RateLimit) {
        return ResumeEligibility {
            can_resume: true,
            reason: Some(ErrorKind::RateLimit.operator_message().to_string()),
            suggested_delay: Some(rules.rate_limit_delay),
            blocking_kinds: Vec::new(),
        };
    }

    ResumeEligibility::clear()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ErrorId, NewCampaignError};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn open_error(kind: ErrorKind, auto: bool, minutes_ago: i64) -> CampaignError {
        NewCampaignError {
            campaign_id: "C1".to_string(),
            error_kind: kind,
            error_message: "x".to_string(),
            error_details: None,
            step_name: "publish:a".to_string(),
            retry_count: 1,
            max_retries: 1,
            can_auto_resume: auto,
            created_at: now() - ChronoDuration::minutes(minutes_ago),
        }
        .into_record(ErrorId::new())
    }

    #[test]
    fn test_no_errors_can_resume() {
        let result = evaluate(&[], now(), &ResumeRules::default());
        assert!(result.can_resume);
        assert!(result.reason.is_none());
        assert!(result.suggested_delay.is_none());
    }

    #[test]
    fn test_non_resumable_kind_blocks() {
        let errors = [
            open_error(ErrorKind::Network, true, 5),
            open_error(ErrorKind::Authentication, false, 10),
        ];
        let result = evaluate(&errors, now(), &ResumeRules::default());
        assert!(!result.can_resume);
        assert_eq!(result.blocking_kinds, vec![ErrorKind::Authentication]);
        assert!(result.reason.unwrap().contains("credential"));
    }

    #[test]
    fn test_rate_limit_suggests_delay() {
        let errors = [
            open_error(ErrorKind::Network, true, 5),
            open_error(ErrorKind::RateLimit, true, 10),
        ];
        let result = evaluate(&errors, now(), &ResumeRules::default());
        assert!(result.can_resume);
        assert_eq!(result.suggested_delay, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_resumable_errors_only() {
        let errors = [open_error(ErrorKind::ApiFailure, true, 1)];
        let result = evaluate(&errors, now(), &ResumeRules::default());
        assert!(result.can_resume);
        assert!(result.suggested_delay.is_none());
    }

    #[test]
    fn test_old_errors_outside_window_are_ignored() {
        let errors = [open_error(ErrorKind::Authentication, false, 61)];
        let result = evaluate(&errors, now(), &ResumeRules::default());
        assert!(result.can_resume);
    }

    #[test]
    fn test_resolved_rows_are_ignored() {
        let mut resolved = open_error(ErrorKind::Authentication, false, 1);
        resolved.resolve(now());
        let result = evaluate(&[resolved], now(), &ResumeRules::default());
        assert!(result.can_resume);
    }

    #[test]
    fn test_custom_rules() {
        let rules = ResumeRules {
            window: Duration::from_secs(120),
            rate_limit_delay: Duration::from_secs(30),
        };
        let errors = [
            open_error(ErrorKind::Unknown, false, 5),
            open_error(ErrorKind::RateLimit, true, 1),
        ];
        let result = evaluate(&errors, now(), &rules);
        assert!(result.can_resume);
        assert_eq!(result.suggested_delay, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let rules = ResumeRules {
            window: Duration::from_secs(u64::MAX),
            ..ResumeRules::default()
        };
        let errors = [open_error(ErrorKind::Unknown, false, 60 * 24 * 365)];
        let result = evaluate(&errors, now(), &rules);
        assert!(!result.can_resume);
    }
}
