//! Cache key derivation.
//!
//! A query is canonicalised (lower-cased, whitespace collapsed, trimmed),
//! the relevant call options are appended, and the result is hashed with
//! SHA-256. The hex digest is stable across processes, so keys survive a
//! snapshot/reload cycle.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{MimirError, Result};

/// Call options that influence a completion and therefore its cache key.
///
/// ```rust
/// # use mimir::QueryOptions;
/// let opts = QueryOptions::new().model("llama-3.1-8b").temperature(0.2);
/// assert_eq!(opts.model.as_deref(), Some("llama-3.1-8b"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Fill unset fields from `defaults`.
    fn or(&self, defaults: &QueryOptions) -> QueryOptions {
        QueryOptions {
            model: self.model.clone().or_else(|| defaults.model.clone()),
            temperature: self.temperature.or(defaults.temperature),
        }
    }
}

/// Turns `(query, options)` into a cache key.
///
/// Without defaults, an absent option is simply not encoded: a call that
/// omits `model` and one that passes the upstream default model produce
/// different keys. Configure [`with_defaults`](Self::with_defaults) with the
/// values the completion client falls back to and both forms collapse onto
/// the same key.
#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    defaults: QueryOptions,
}

impl KeyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `defaults` for any option the caller leaves unset.
    pub fn with_defaults(defaults: QueryOptions) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &QueryOptions {
        &self.defaults
    }

    /// Compute the cache key for a query.
    ///
    /// Returns [`MimirError::InvalidInput`] if the query is empty once
    /// whitespace is collapsed.
    pub fn normalize(&self, query: &str, options: &QueryOptions) -> Result<String> {
        let canonical = canonical_form(query, &options.or(&self.defaults))?;
        Ok(hex_sha256(&canonical))
    }
}

/// Free-function form of [`KeyNormalizer::normalize`] without defaults.
pub fn normalize(query: &str, options: &QueryOptions) -> Result<String> {
    KeyNormalizer::new().normalize(query, options)
}

/// Lower-cased, whitespace-collapsed query with option suffixes.
pub(crate) fn canonical_form(query: &str, options: &QueryOptions) -> Result<String> {
    let mut canonical = canonical_query(query);
    if canonical.is_empty() {
        return Err(MimirError::InvalidInput("query is empty".to_string()));
    }
    if let Some(model) = &options.model {
        canonical.push_str("|model:");
        canonical.push_str(model);
    }
    if let Some(temperature) = options.temperature {
        canonical.push_str(&format!("|temp:{temperature}"));
    }
    Ok(canonical)
}

/// Lower-case and collapse whitespace runs to single spaces.
pub(crate) fn canonical_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
