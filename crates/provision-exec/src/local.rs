//! Executor for the operator's own machine
//!
//! Used for loopback hosts and for driving local provider CLIs. Commands run
//! as the current process user; `Target::user` only shows up in logs.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandResult, Target, TransferResult};
use crate::traits::RemoteExecutor;
use crate::transfer::{TransferRequest, run_rsync};

/// Runs commands through `sh -c`
#[derive(Debug, Clone, Copy)]
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &str) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self, cmd), fields(target = %target), level = "debug")]
    async fn run(
        &self,
        target: &Target,
        cmd: &str,
        limit: Duration,
    ) -> Result<CommandResult, ExecError> {
        debug!(command = %cmd, "local command");
        let start = Instant::now();

        let output = match timeout(limit, Self::command(cmd).output()).await {
            Ok(output) => output.map_err(|e| ExecError::SpawnError(format!("sh: {e}")))?,
            Err(_) => {
                // kill_on_drop reaps the child
                warn!(command = %cmd, timeout = ?limit, "local command timed out");
                return Err(ExecError::Timeout { timeout: limit });
            }
        };

        let result = CommandResult {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };
        debug!(status = result.status, duration = ?result.duration, "local command finished");
        Ok(result)
    }

    #[instrument(skip(self, request), fields(target = %target), level = "debug")]
    async fn transfer(
        &self,
        target: &Target,
        request: &TransferRequest,
        limit: Duration,
    ) -> Result<TransferResult, ExecError> {
        let args = request.rsync_args(&request.remote_path, None);
        run_rsync(args, limit).await
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(5);

    fn me() -> Target {
        Target::new("127.0.0.1", "operator")
    }

    #[tokio::test]
    async fn test_stdout_and_exit_status() {
        let executor = LocalExecutor::new();

        let ok = executor.run(&me(), "printf 'hi\\n'", LIMIT).await.unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout, "hi\n");

        let failed = executor.run(&me(), "echo nope >&2; exit 3", LIMIT).await.unwrap();
        assert_eq!(failed.status, 3);
        assert_eq!(failed.failure_summary(), "nope");
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let executor = LocalExecutor::new();
        let result = executor
            .run(&me(), "sleep 5", Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stdin_is_closed() {
        // cat would block forever on an inherited terminal
        let result = LocalExecutor::new()
            .run(&me(), "cat", LIMIT)
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires rsync"]
    async fn test_mirror_skips_excluded_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("app.env"), "PORT=4000").unwrap();
        std::fs::write(src.path().join("secrets.env"), "TOKEN=x").unwrap();
        std::fs::write(dst.path().join("stale.env"), "old").unwrap();

        let request = TransferRequest::new(src.path(), dst.path().display().to_string())
            .mirrored()
            .excluding(["secrets.env"]);
        LocalExecutor::new()
            .transfer(&me(), &request, LIMIT)
            .await
            .unwrap();

        assert!(dst.path().join("app.env").exists());
        assert!(!dst.path().join("secrets.env").exists());
        assert!(!dst.path().join("stale.env").exists());
    }
}
