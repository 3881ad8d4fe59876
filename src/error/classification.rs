//! Error classification types for the campaign recovery engine
//!
//! Every failure a campaign step reports is reduced to one of seven canonical
//! [`ErrorKind`]s before any retry decision is made. The kind is the only
//! vocabulary the retry policy table, the error ledger and the operator-facing
//! pause reasons understand.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The canonical category of a campaign failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The content generator failed to produce text.
    ContentGeneration,
    /// A platform adapter failed to publish.
    Publishing,
    /// A third-party API returned an error response.
    ApiFailure,
    /// Connectivity problems (DNS, TCP, fetch failures).
    Network,
    /// Credentials were rejected.
    Authentication,
    /// The remote side is throttling requests.
    RateLimit,
    /// Nothing matched.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in classifier priority order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::ContentGeneration,
        ErrorKind::Publishing,
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::RateLimit,
        ErrorKind::ApiFailure,
        ErrorKind::Unknown,
    ];

    /// Stable snake_case name, as persisted in the `error_kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ContentGeneration => "content_generation",
            ErrorKind::Publishing => "publishing",
            ErrorKind::ApiFailure => "api_failure",
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Explanation shown to an operator when a campaign pauses on this kind.
    pub fn operator_message(&self) -> &'static str {
        match self {
            ErrorKind::ContentGeneration => {
                "content generation kept failing; check the generator before resuming"
            }
            ErrorKind::Publishing => {
                "publishing kept failing on a platform; check the adapter before resuming"
            }
            ErrorKind::ApiFailure => "a third-party API kept failing; will retry automatically",
            ErrorKind::Network => "network failures persisted; will retry automatically",
            ErrorKind::Authentication => {
                "authentication failure requires a manual credential fix"
            }
            ErrorKind::RateLimit => "rate limited, will retry automatically",
            ErrorKind::Unknown => "an unrecognised failure requires manual review",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name an [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error kind: {0}")]
pub struct ParseErrorKindError(pub String);

impl FromStr for ErrorKind {
    type Err = ParseErrorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| ParseErrorKindError(s.to_string()))
    }
}

/// A failure reduced to its kind together with the rendered message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedError {
    /// The canonical kind.
    pub kind: ErrorKind,
    /// Human-readable rendering of the underlying failure.
    pub message: String,
    /// The keyword or pattern that decided the kind, if any.
    pub matched: Option<String>,
}

impl ClassifiedError {
    /// Creates a new classified error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            matched: None,
        }
    }

    /// Records what matched during classification.
    pub fn with_match(mut self, matched: impl Into<String>) -> Self {
        self.matched = Some(matched.into());
        self
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ContentGeneration).unwrap();
        assert_eq!(json, "\"content_generation\"");

        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");

        let kind: ErrorKind = serde_json::from_str("\"api_failure\"").unwrap();
        assert_eq!(kind, ErrorKind::ApiFailure);
    }

    #[test]
    fn test_as_str_matches_serde_name() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!("network".parse::<ErrorKind>(), Ok(ErrorKind::Network));
        assert_eq!(
            " Authentication ".parse::<ErrorKind>(),
            Ok(ErrorKind::Authentication)
        );
        assert_eq!(
            "timeout".parse::<ErrorKind>(),
            Err(ParseErrorKindError("timeout".to_string()))
        );
    }

    #[test]
    fn test_all_has_every_kind_once() {
        let mut kinds = ErrorKind::ALL.to_vec();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), 7);
    }

    #[test]
    fn test_operator_message_for_authentication() {
        assert!(ErrorKind::Authentication
            .operator_message()
            .contains("manual credential fix"));
        assert!(ErrorKind::RateLimit
            .operator_message()
            .contains("retry automatically"));
    }

    #[test]
    fn test_classified_error_display() {
        let error = ClassifiedError::new(ErrorKind::Network, "connection refused")
            .with_match("connection");
        assert_eq!(error.to_string(), "[network] connection refused");
        assert_eq!(error.matched.as_deref(), Some("connection"));
    }
}
