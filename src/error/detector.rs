//! Keyword classifier for campaign step failures
//!
//! Failures are rendered to a lowercase string and matched against an ordered
//! list of rules. The first rule that matches decides the [`ErrorKind`]; when
//! nothing matches the failure is `unknown`. Keyword sets overlap, so the
//! order of the rules is part of the behavior.

use regex::Regex;

use super::{ClassifiedError, ErrorKind};

/// A single classification rule: a keyword set and an optional pattern.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    /// The kind assigned when this rule matches.
    kind: ErrorKind,
    /// Lowercase substrings, any of which triggers the rule.
    keywords: Vec<String>,
    /// Extra pattern checked after the keywords.
    pattern: Option<Regex>,
}

impl KeywordRule {
    /// Creates a rule from a keyword set.
    pub fn new<I, S>(kind: ErrorKind, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
            pattern: None,
        }
    }

    /// Adds a pattern checked when no keyword matched.
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Appends keywords to the set.
    pub fn extend_keywords<I, S>(&mut self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for keyword in keywords {
            let keyword = keyword.into().to_lowercase();
            if !keyword.is_empty() && !self.keywords.contains(&keyword) {
                self.keywords.push(keyword);
            }
        }
    }

    /// Returns the kind this rule assigns.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the keyword set.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Returns what matched in an already-lowercased text.
    pub fn find(&self, lowered: &str) -> Option<String> {
        if let Some(keyword) = self.keywords.iter().find(|k| lowered.contains(k.as_str())) {
            return Some(keyword.clone());
        }
        self.pattern
            .as_ref()
            .and_then(|p| p.find(lowered))
            .map(|m| m.as_str().to_string())
    }
}

/// Maps failure messages to an [`ErrorKind`]. Pure: no state changes on use.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    /// Rules in priority order.
    rules: Vec<KeywordRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the default rule set.
    pub fn new() -> Self {
        Self {
            rules: Self::default_rules(),
        }
    }

    /// Creates a classifier with custom rules.
    pub fn with_rules(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    /// Adds adapter identifiers to the `publishing` keyword set.
    pub fn with_adapter_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(rule) = self
            .rules
            .iter_mut()
            .find(|r| r.kind == ErrorKind::Publishing)
        {
            rule.extend_keywords(names);
        }
        self
    }

    fn default_rules() -> Vec<KeywordRule> {
        vec![
            KeywordRule::new(
                ErrorKind::ContentGeneration,
                ["content", "generation", "generate", "openai"],
            ),
            KeywordRule::new(
                ErrorKind::Publishing,
                ["publish", "platform", "telegraph", "pastebin", "paste"],
            ),
            KeywordRule::new(ErrorKind::Network, ["network", "fetch", "connection"]),
            KeywordRule::new(
                ErrorKind::Authentication,
                ["auth", "unauthorized", "forbidden"],
            ),
            KeywordRule::new(
                ErrorKind::RateLimit,
                [
                    "rate limit",
                    "rate-limit",
                    "ratelimit",
                    "too many requests",
                    "429",
                ],
            ),
            KeywordRule::new(ErrorKind::ApiFailure, ["api"])
                .with_pattern(Regex::new(r"\b[45]\d{2}\b").expect("static status pattern")),
        ]
    }

    /// Returns the configured rules.
    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Classifies a failure message.
    pub fn classify(&self, message: &str) -> ErrorKind {
        self.classify_message(message).kind
    }

    /// Classifies a failure message, keeping the message and the match.
    pub fn classify_message(&self, message: &str) -> ClassifiedError {
        let lowered = message.to_lowercase();
        for rule in &self.rules {
            if let Some(matched) = rule.find(&lowered) {
                return ClassifiedError::new(rule.kind, message).with_match(matched);
            }
        }
        ClassifiedError::new(ErrorKind::Unknown, message)
    }

    /// Classifies any error value by first rendering it with [`describe_error`].
    pub fn classify_error(&self, err: &(dyn std::error::Error + 'static)) -> ClassifiedError {
        self.classify_message(&describe_error(err))
    }
}

/// Renders an error and its `source()` chain as one printable line.
///
/// Sources whose text the parent message already contains are skipped, and
/// control characters are replaced so the result is always printable.
pub fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }

    let printable: String = rendered
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let trimmed = printable.trim();
    if trimmed.is_empty() {
        "unspecified error".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Outer {
        #[source]
        inner: std::io::Error,
    }

    #[test]
    fn test_default_rule_order() {
        let classifier = ErrorClassifier::new();
        let kinds: Vec<ErrorKind> = classifier.rules().iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::ContentGeneration,
                ErrorKind::Publishing,
                ErrorKind::Network,
                ErrorKind::Authentication,
                ErrorKind::RateLimit,
                ErrorKind::ApiFailure,
            ]
        );
    }

    #[test]
    fn test_classify_each_kind() {
        let classifier = ErrorClassifier::new();
        let cases = [
            ("OpenAI request returned empty body", ErrorKind::ContentGeneration),
            ("failed to generate article", ErrorKind::ContentGeneration),
            ("Telegraph rejected the page", ErrorKind::Publishing),
            ("could not publish to destination", ErrorKind::Publishing),
            ("Network error: DNS lookup failed", ErrorKind::Network),
            ("TypeError: Failed to fetch", ErrorKind::Network),
            ("Connection reset by peer", ErrorKind::Network),
            ("401 Unauthorized", ErrorKind::Authentication),
            ("403 Forbidden", ErrorKind::Authentication),
            ("Rate limit exceeded", ErrorKind::RateLimit),
            ("HTTP 429", ErrorKind::RateLimit),
            ("Too Many Requests", ErrorKind::RateLimit),
            ("upstream API returned garbage", ErrorKind::ApiFailure),
            ("server responded 502", ErrorKind::ApiFailure),
            ("status 404 for resource", ErrorKind::ApiFailure),
            ("something odd happened", ErrorKind::Unknown),
        ];

        for (message, expected) in cases {
            assert_eq!(
                classifier.classify(message),
                expected,
                "wrong kind for: {}",
                message
            );
        }
    }

    #[test]
    fn test_priority_order_decides_overlaps() {
        let classifier = ErrorClassifier::new();
        // network is checked before authentication
        assert_eq!(
            classifier.classify("network auth handshake failed"),
            ErrorKind::Network
        );
        // content generation wins over everything
        assert_eq!(
            classifier.classify("content api rate limit"),
            ErrorKind::ContentGeneration
        );
        // authentication wins over the api keyword
        assert_eq!(
            classifier.classify("api key unauthorized"),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn test_status_code_pattern_needs_word_boundary() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.classify("request id 45001"), ErrorKind::Unknown);
        assert_eq!(classifier.classify("got 500"), ErrorKind::ApiFailure);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = ErrorClassifier::new();
        for _ in 0..10 {
            assert_eq!(
                classifier.classify("Connection refused"),
                ErrorKind::Network
            );
        }
    }

    #[test]
    fn test_classify_message_keeps_match() {
        let classifier = ErrorClassifier::new();
        let classified = classifier.classify_message("Failed to FETCH feed");
        assert_eq!(classified.kind, ErrorKind::Network);
        assert_eq!(classified.message, "Failed to FETCH feed");
        assert_eq!(classified.matched.as_deref(), Some("fetch"));

        let unknown = classifier.classify_message("weird");
        assert!(unknown.matched.is_none());
    }

    #[test]
    fn test_with_adapter_names_extends_publishing() {
        let classifier = ErrorClassifier::new().with_adapter_names(["Medium", "devto"]);
        assert_eq!(
            classifier.classify("medium returned an error page"),
            ErrorKind::Publishing
        );
        assert_eq!(classifier.classify("devto: 500"), ErrorKind::Publishing);
    }

    #[test]
    fn test_describe_error_walks_sources() {
        let err = Outer {
            inner: std::io::Error::new(std::io::ErrorKind::Other, "connection refused"),
        };
        assert_eq!(describe_error(&err), "request failed: connection refused");
    }

    #[test]
    fn test_describe_error_strips_control_characters() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "bad\u{0}\nthing");
        assert_eq!(describe_error(&err), "bad  thing");
    }

    #[test]
    fn test_describe_error_empty_message() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "");
        assert_eq!(describe_error(&err), "unspecified error");
    }

    #[test]
    fn test_classify_error_uses_source_chain() {
        let classifier = ErrorClassifier::new();
        let err = Outer {
            inner: std::io::Error::new(std::io::ErrorKind::Other, "network unreachable"),
        };
        let classified = classifier.classify_error(&err);
        assert_eq!(classified.kind, ErrorKind::Network);
        assert_eq!(classified.message, "request failed: network unreachable");
    }
}
