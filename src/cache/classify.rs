//! Query classification for TTL selection.
//!
//! Factual questions ("capital of France") go stale slowly and get a long
//! TTL; conversational messages get a short one. The classifier is a fixed
//! set of anchored regex prefixes matched against the canonical query.
//! Misclassification only affects freshness, never correctness.

use std::fmt;
use std::sync::LazyLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use super::key::canonical_query;
use crate::{MimirError, Result};

/// Freshness class of a cached query, decided once at insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Factual,
    Conversational,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Factual => "factual",
            QueryClass::Conversational => "conversational",
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefixes that mark a query as factual.
pub const FACTUAL_PATTERNS: &[&str] = &[
    r"^who (is|was|are|were)\b",
    r"^what (is|was|are|were)\b",
    r"^when (is|was|did)\b",
    r"^where (is|was|are)\b",
    r"^how (many|much|old|tall|far)\b",
    r"^capital of\b",
    r"^population of\b",
    r"^born in\b",
    r"^define\b",
    r"^meaning of\b",
];

static DEFAULT_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(FACTUAL_PATTERNS).expect("built-in factual patterns are valid regexes")
});

/// Regex-prefix classifier.
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    patterns: RegexSet,
}

impl QueryClassifier {
    /// Classifier using [`FACTUAL_PATTERNS`].
    pub fn new() -> Self {
        Self {
            patterns: DEFAULT_SET.clone(),
        }
    }

    /// Classifier with caller-supplied factual patterns.
    ///
    /// Patterns are matched against the lower-cased, whitespace-collapsed
    /// query.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSet::new(patterns)
            .map_err(|e| MimirError::Configuration(format!("invalid factual pattern: {e}")))?;
        Ok(Self { patterns })
    }

    pub fn classify(&self, query: &str) -> QueryClass {
        if self.patterns.is_match(&canonical_query(query)) {
            QueryClass::Factual
        } else {
            QueryClass::Conversational
        }
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}
