//! Result and target types for remote execution

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Last non-empty line of stderr, falling back to stdout
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let pick = |s: &str| {
            s.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit status {}", self.status))
    }
}

/// Outcome of a directory transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    /// Transfer tool output (itemized changes)
    pub output: String,
    /// Time taken to transfer
    pub duration: Duration,
}

/// A resolved address plus the OS identity to act as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Resolved network address
    pub address: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// OS user to run as
    pub user: String,
}

fn default_port() -> u16 {
    22
}

impl Target {
    /// Create a new target on the default SSH port
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: 22,
            user: user.into(),
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Same address and port, different user
    #[must_use]
    pub fn as_user(&self, user: impl Into<String>) -> Self {
        Self {
            address: self.address.clone(),
            port: self.port,
            user: user.into(),
        }
    }

    /// `user@host:path` for rsync, with IPv6 addresses bracketed
    #[must_use]
    pub fn rsync_destination(&self, path: &str) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("{}@[{}]:{path}", self.user, self.address)
        } else {
            format!("{}@{}:{path}", self.user, self.address)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}
