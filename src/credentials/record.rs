use std::fmt;

use serde::{Deserialize, Serialize};

/// One API credential in a service pool.
///
/// `Debug` prints the masked secret only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub secret: String,
    pub label: String,
    pub added_at: u64,
    /// Calls made since the last quota reset.
    pub usage_count: u64,
    /// `None` until first selected.
    pub last_used_at: Option<u64>,
    pub enabled: bool,
}

impl CredentialRecord {
    pub fn new(secret: impl Into<String>, label: impl Into<String>, added_at: u64) -> Self {
        Self {
            secret: secret.into(),
            label: label.into(),
            added_at,
            usage_count: 0,
            last_used_at: None,
            enabled: true,
        }
    }

    /// Whether the record may be handed out under `limit` requests per window.
    pub fn is_usable(&self, limit: u64) -> bool {
        self.enabled && self.usage_count < limit
    }

    pub fn masked(&self) -> String {
        mask(&self.secret)
    }

    pub fn summary(&self, limit: u64) -> KeySummary {
        KeySummary {
            masked: self.masked(),
            label: self.label.clone(),
            added_at: self.added_at,
            usage_count: self.usage_count,
            remaining: limit.saturating_sub(self.usage_count),
            last_used_at: self.last_used_at,
            enabled: self.enabled,
        }
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("secret", &self.masked())
            .field("label", &self.label)
            .field("added_at", &self.added_at)
            .field("usage_count", &self.usage_count)
            .field("last_used_at", &self.last_used_at)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Externally visible view of a credential. Never carries the full secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySummary {
    pub masked: String,
    pub label: String,
    pub added_at: u64,
    pub usage_count: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    pub last_used_at: Option<u64>,
    pub enabled: bool,
}

/// Characters kept at each end of a masked secret.
const MASK_VISIBLE: usize = 4;

/// Redact all but the first and last few characters of a secret.
///
/// Secrets too short to keep both ends hidden are fully redacted.
///
/// ```rust
/// # use mimir::credentials::mask;
/// assert_eq!(mask("gsk_abcdefghijklmnop1234"), "gsk_...1234");
/// assert_eq!(mask("short"), "****");
/// ```
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= MASK_VISIBLE * 3 {
        return "****".to_string();
    }
    let head: String = chars[..MASK_VISIBLE].iter().collect();
    let tail: String = chars[chars.len() - MASK_VISIBLE..].iter().collect();
    format!("{head}...{tail}")
}
