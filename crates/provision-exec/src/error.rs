//! Error types for provision-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during remote execution or transfer
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command or transfer timed out
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Directory transfer failed
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Whether the remote channel itself is unusable (as opposed to a
    /// command that ran and failed)
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::AuthenticationFailed(_)
                | ExecError::SshKeyError(_)
                | ExecError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(ExecError::ConnectionFailed("refused".into()).is_connectivity());
        assert!(
            ExecError::Timeout {
                timeout: Duration::from_secs(5)
            }
            .is_connectivity()
        );
        assert!(!ExecError::TransferFailed("rsync exited 23".into()).is_connectivity());
        assert!(ExecError::AuthenticationFailed("denied".into()).is_connectivity());
    }
}
