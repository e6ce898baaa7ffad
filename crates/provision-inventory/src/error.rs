//! Error types for provision-inventory

use thiserror::Error;

/// Errors that can occur during inventory operations
#[derive(Error, Debug, Clone)]
pub enum InventoryError {
    /// Provider CLI is not installed or not on PATH
    #[error("provider tool not found: {0}")]
    ToolNotFound(String),

    /// Provider rejected the request
    #[error("provider command failed: {0}")]
    CommandFailed(String),

    /// Failed to parse provider output
    #[error("JSON parse error: {0}")]
    ParseError(String),

    /// Local execution error
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Resource did not become ready in time
    #[error("resource {id} not ready after {timeout:?}")]
    NotReady {
        /// Provider resource id
        id: String,
        /// How long we waited
        timeout: std::time::Duration,
    },

    /// Provider call timed out
    #[error("provider timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}
