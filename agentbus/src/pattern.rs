//! Event type pattern matching
//!
//! Supported forms, checked in this order:
//!
//! - `*` matches any non-empty event type
//! - `prefix.*` matches types starting with `prefix.` (the dot is required)
//! - `*.suffix` matches types ending with `.suffix`
//! - anything else is compared literally
//!
//! A `*` in any other position is literal: `com.*.created` only matches the
//! event type `com.*.created`.

use std::fmt;

/// A subscription pattern classified once at subscribe time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    Any,
    /// Stored with the trailing dot, e.g. `"com.orders."`.
    Prefix(String),
    /// Stored with the leading dot, e.g. `".created"`.
    Suffix(String),
    Exact(String),
}

impl Pattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Pattern::Any
        } else if let Some(prefix) = pattern.strip_suffix('*').filter(|p| p.ends_with('.')) {
            Pattern::Prefix(prefix.to_string())
        } else if let Some(suffix) = pattern.strip_prefix('*').filter(|s| s.starts_with('.')) {
            Pattern::Suffix(suffix.to_string())
        } else {
            Pattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, event_type: &str) -> bool {
        if event_type.is_empty() {
            return false;
        }
        match self {
            Pattern::Any => true,
            Pattern::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
            Pattern::Suffix(suffix) => event_type.ends_with(suffix.as_str()),
            Pattern::Exact(exact) => event_type == exact,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Prefix(prefix) => write!(f, "{prefix}*"),
            Pattern::Suffix(suffix) => write!(f, "*{suffix}"),
            Pattern::Exact(exact) => f.write_str(exact),
        }
    }
}

/// Check whether `event_type` matches `pattern`.
pub fn matches(pattern: &str, event_type: &str) -> bool {
    Pattern::parse(pattern).matches(event_type)
}
