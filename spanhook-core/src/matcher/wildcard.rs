//! Wildcard patterns over fully qualified names.
//!
//! `*` matches any run of characters, anywhere in the pattern. Matching is
//! case-insensitive unless the pattern starts with `(?-i)`; a leading `(?i)`
//! is accepted and means the default.

use regex::Regex;
use std::fmt;

use crate::error::ConfigError;

const CASE_SENSITIVE_PREFIX: &str = "(?-i)";
const CASE_INSENSITIVE_PREFIX: &str = "(?i)";

#[derive(Clone)]
pub struct WildcardMatcher {
    pattern: String,
    body: String,
    case_sensitive: bool,
    regex: Regex,
}

impl WildcardMatcher {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let (body, case_sensitive) = if let Some(rest) = pattern.strip_prefix(CASE_SENSITIVE_PREFIX) {
            (rest, true)
        } else if let Some(rest) = pattern.strip_prefix(CASE_INSENSITIVE_PREFIX) {
            (rest, false)
        } else {
            (pattern, false)
        };

        let escaped: Vec<String> = body.split('*').map(regex::escape).collect();
        let source = format!(
            "{}^{}$",
            if case_sensitive { "" } else { "(?i)" },
            escaped.join(".*")
        );
        let regex = Regex::new(&source).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            body: body.to_string(),
            case_sensitive,
            regex,
        })
    }

    /// Parse a list of patterns, failing on the first invalid one.
    pub fn parse_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Self>, ConfigError> {
        patterns.iter().map(|p| Self::parse(p.as_ref())).collect()
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn matches_any(matchers: &[WildcardMatcher], value: &str) -> bool {
        matchers.iter().any(|m| m.matches(value))
    }

    /// The pattern as written, including any case prefix
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Literal text before the first wildcard, if any. Usable as a cheap
    /// prefix filter.
    pub fn literal_prefix(&self) -> Option<&str> {
        let prefix = self.body.split('*').next().unwrap_or("");
        if prefix.is_empty() {
            None
        } else {
            Some(prefix)
        }
    }
}

impl fmt::Debug for WildcardMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WildcardMatcher").field(&self.pattern).finish()
    }
}

impl fmt::Display for WildcardMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl PartialEq for WildcardMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
