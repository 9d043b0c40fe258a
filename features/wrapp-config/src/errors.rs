use std::sync::Arc;

use wrapp_context::ContextError;

/// Errors when trying to acquire a config
#[derive(thiserror::Error, Debug, Clone)]
pub enum ConfigError {
    /// Resolving the configuration binding failed
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The configuration is neither the requested type nor JSON
    #[error("Configuration for '{key}' has type '{actual}' and cannot be read as '{required}'")]
    Mismatch {
        key: String,
        required: &'static str,
        actual: &'static str,
    },
    /// The JSON configuration does not fit the requested type
    #[error("Failed to deserialize configuration for '{key}': {error}")]
    Deserialize {
        key: String,
        #[source]
        error: Arc<serde_json::Error>,
    },
}
