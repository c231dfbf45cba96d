//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.mimir/config.toml` (user)
//! 3. `/etc/mimir/config.toml` (system)
//!
//! A missing file is not an error: every field has a default.
//!
//! Bootstrap ("primary") credentials are loaded separately with mandatory
//! permission checks:
//! 1. `~/.mimir/secrets.toml` (user, must be 0600)
//! 2. `/etc/mimir/secrets.toml` (system, must be 0600)
//!
//! and fall back to `<SERVICE>_API_KEY` environment variables.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, QueryOptions};
use crate::credentials::{PoolConfig, SelectionPolicy};
use crate::{MimirError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    /// Per-service quota settings, keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSection>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_factual_ttl")]
    pub factual_ttl_secs: u64,
    #[serde(default = "default_conversational_ttl")]
    pub conversational_ttl_secs: u64,
    #[serde(default = "default_base_ttl")]
    pub base_ttl_secs: u64,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
    /// Snapshot file (default: `<data dir>/mimir/cache.json`).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Model assumed when a caller omits one; unifies cache keys.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Temperature assumed when a caller omits one; unifies cache keys.
    #[serde(default)]
    pub default_temperature: Option<f32>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            factual_ttl_secs: default_factual_ttl(),
            conversational_ttl_secs: default_conversational_ttl(),
            base_ttl_secs: default_base_ttl(),
            snapshot_interval_secs: default_snapshot_interval(),
            path: None,
            default_model: None,
            default_temperature: None,
        }
    }
}

fn default_max_entries() -> usize {
    CacheConfig::default().max_entries
}

fn default_factual_ttl() -> u64 {
    CacheConfig::default().factual_ttl.as_secs()
}

fn default_conversational_ttl() -> u64 {
    CacheConfig::default().conversational_ttl.as_secs()
}

fn default_base_ttl() -> u64 {
    CacheConfig::default().base_ttl.as_secs()
}

fn default_snapshot_interval() -> u64 {
    CacheConfig::default().snapshot_interval.as_secs()
}

impl CacheSection {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.max_entries)
            .factual_ttl(Duration::from_secs(self.factual_ttl_secs))
            .conversational_ttl(Duration::from_secs(self.conversational_ttl_secs))
            .base_ttl(Duration::from_secs(self.base_ttl_secs))
            .snapshot_interval(Duration::from_secs(self.snapshot_interval_secs))
    }

    pub fn key_defaults(&self) -> QueryOptions {
        QueryOptions {
            model: self.default_model.clone(),
            temperature: self.default_temperature,
        }
    }

    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("cache.json"))
    }
}

/// `[credentials]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsSection {
    /// Pool file (default: `<data dir>/mimir/credentials.json`).
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub policy: SelectionPolicy,
}

impl CredentialsSection {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("credentials.json"))
    }
}

/// `[services.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_requests_per_credential")]
    pub requests_per_credential: u64,
    #[serde(default = "default_rotation_period")]
    pub rotation_period_secs: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            requests_per_credential: default_requests_per_credential(),
            rotation_period_secs: default_rotation_period(),
        }
    }
}

fn default_requests_per_credential() -> u64 {
    PoolConfig::default().requests_per_credential
}

fn default_rotation_period() -> u64 {
    PoolConfig::default().rotation_period.as_secs()
}

impl ServiceSection {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .requests_per_credential(self.requests_per_credential)
            .rotation_period(Duration::from_secs(self.rotation_period_secs))
    }
}

/// Default data directory: `<data dir>/mimir` (e.g. `~/.local/share/mimir`).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("mimir")
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first of
    /// `~/.mimir/config.toml` and `/etc/mimir/config.toml` that exists is
    /// used, falling back to all defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|e| {
                    MimirError::Configuration(format!("Failed to read config file {path:?}: {e}"))
                })?;
                Self::from_toml(&content).map_err(|e| {
                    MimirError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
                })
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MimirError::Configuration(e.to_string()))
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MimirError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".mimir").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/mimir/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

/// Bootstrap credentials, keyed by service name.
///
/// ```toml
/// [groq]
/// api_key = "gsk_..."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secrets {
    pub services: BTreeMap<String, ApiKeySecret>,
}

/// A single API key secret.
#[derive(Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl std::fmt::Debug for ApiKeySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeySecret")
            .field("api_key", &crate::credentials::mask(&self.api_key))
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (env vars may still apply).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".mimir").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/mimir/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a specific secrets file, enforcing owner-only permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// API key for `service`, falling back to `<SERVICE>_API_KEY`.
    pub fn api_key(&self, service: &str) -> Option<String> {
        self.services
            .get(service)
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(env_var_for(service)).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Environment variable holding the bootstrap key for `service`.
pub fn env_var_for(service: &str) -> String {
    let upper: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{upper}_API_KEY")
}

/// Check that a secrets file has secure permissions (0600 or 0400).
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| {
        MimirError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
    })?;

    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(MimirError::Configuration(format!(
            "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
            mode & 0o777
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
