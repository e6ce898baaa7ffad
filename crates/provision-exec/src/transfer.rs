//! Directory transfer via rsync
//!
//! Both executors delegate tree copies to a local `rsync` process; only the
//! remote-shell argument differs.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::TransferResult;

/// A single local → remote directory copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Local source directory (its contents are copied)
    pub local_path: PathBuf,
    /// Destination directory on the remote host
    pub remote_path: String,
    /// Glob patterns never copied (and never deleted at the destination)
    pub exclude_patterns: Vec<String>,
    /// Make the destination match the source, deletions included
    pub mirror: bool,
}

impl TransferRequest {
    /// Create a plain (non-mirroring) copy request
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            exclude_patterns: Vec::new(),
            mirror: false,
        }
    }

    /// Enable mirroring semantics
    #[must_use]
    pub fn mirrored(mut self) -> Self {
        self.mirror = true;
        self
    }

    /// Add exclude patterns, skipping duplicates
    #[must_use]
    pub fn excluding<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pattern in patterns {
            let pattern = pattern.into();
            if !self.exclude_patterns.contains(&pattern) {
                self.exclude_patterns.push(pattern);
            }
        }
        self
    }

    /// Build the rsync argument vector
    ///
    /// `destination` is `user@host:path` for remote copies or a plain path for
    /// local ones. `remote_shell` is passed through `-e` when set.
    #[must_use]
    pub fn rsync_args(&self, destination: &str, remote_shell: Option<&str>) -> Vec<String> {
        let mut args = vec!["-az".to_string(), "--itemize-changes".to_string()];

        if self.mirror {
            args.push("--delete".to_string());
        }

        for pattern in &self.exclude_patterns {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }

        if let Some(shell) = remote_shell {
            args.push("-e".to_string());
            args.push(shell.to_string());
        }

        // Trailing slash: copy the directory's contents, not the directory
        let mut source = self.local_path.display().to_string();
        if !source.ends_with('/') {
            source.push('/');
        }
        args.push(source);
        args.push(destination.to_string());
        args
    }
}

/// Spawn rsync with the given arguments and wait for it under `limit`
#[instrument(skip(args), level = "debug")]
pub(crate) async fn run_rsync(
    args: Vec<String>,
    limit: Duration,
) -> Result<TransferResult, ExecError> {
    let start = Instant::now();

    debug!(args = ?args, "spawning rsync");

    let child = Command::new("rsync")
        .args(&args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnError(format!("rsync: {e}")))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ExecError::IoError(e.to_string()))?,
        Err(_) => {
            error!(timeout = ?limit, "rsync timed out");
            return Err(ExecError::Timeout { timeout: limit });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let status = output.status.code().unwrap_or(-1);
        error!(status, stderr = %stderr, "rsync failed");
        // 255 is ssh's own exit code: the channel never came up
        if status == 255 {
            return Err(ExecError::ConnectionFailed(stderr));
        }
        return Err(ExecError::TransferFailed(format!(
            "rsync exited {status}: {stderr}"
        )));
    }

    Ok(TransferResult {
        output: stdout,
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_args_include_delete_and_excludes() {
        let request = TransferRequest::new("/srv/store/dev/api", "/home/dev/runtime/api")
            .mirrored()
            .excluding(["secrets.env", "*.local", "secrets.env"]);

        let args = request.rsync_args("dev@203.0.113.7:/home/dev/runtime/api/", None);

        assert_eq!(args[0], "-az");
        assert!(args.contains(&"--delete".to_string()));
        assert_eq!(
            args.iter().filter(|a| a.as_str() == "--exclude").count(),
            2,
            "duplicate patterns are collapsed"
        );
        assert_eq!(args[args.len() - 2], "/srv/store/dev/api/");
        assert_eq!(args[args.len() - 1], "dev@203.0.113.7:/home/dev/runtime/api/");
    }

    #[test]
    fn test_plain_copy_has_no_delete() {
        let request = TransferRequest::new("/tmp/src/", "/tmp/dst");
        let args = request.rsync_args("/tmp/dst", Some("ssh -p 2222"));

        assert!(!args.contains(&"--delete".to_string()));
        let e = args.iter().position(|a| a == "-e").unwrap();
        assert_eq!(args[e + 1], "ssh -p 2222");
        assert_eq!(args[args.len() - 2], "/tmp/src/");
    }
}
