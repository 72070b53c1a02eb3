//! Error types for the prefetch engine

use thiserror::Error;

/// Result type for prefetch operations
pub type Result<T> = std::result::Result<T, PrefetchError>;

/// Error produced by an application loader.
///
/// The engine never inspects it beyond handing it to the error hook.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while configuring the prefetch engine
#[derive(Error, Debug)]
pub enum PrefetchError {
    /// A normalization or locale pattern failed to compile
    #[error("Invalid path pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Configuration value out of range or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// A loader reported failure
    #[error("Loader for '{key}' failed: {reason}")]
    LoadFailed { key: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PrefetchError {
    /// Build a loader failure from a route key and any displayable reason
    pub fn load_failed(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PrefetchError::LoadFailed {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
