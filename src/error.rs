//! Mimir error types

/// Mimir error types
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    // Caller errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    // Credential errors
    /// Every credential for the service is disabled or over quota.
    ///
    /// Callers are expected to fall back to a statically configured key.
    #[error("no usable credential for service '{service}'")]
    NoneAvailable { service: String },

    // Durable storage errors
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MimirError {
    /// Whether this error only means the durable layer is degraded.
    ///
    /// Storage-class errors never take down request processing; the
    /// affected store keeps running in memory.
    pub fn is_storage(&self) -> bool {
        matches!(self, MimirError::StorageUnavailable(_) | MimirError::Json(_))
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
