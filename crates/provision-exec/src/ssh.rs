//! SSH command execution using russh crate

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::result::{CommandResult, Target, TransferResult};
use crate::traits::RemoteExecutor;
use crate::transfer::{TransferRequest, run_rsync};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Freshly allocated hosts have no known_hosts entry yet
        Ok(true)
    }
}

/// SSH command executor
///
/// Holds one authenticated session per `user@address:port`, opened on first
/// use and reused for later commands to the same target.
pub struct SshExecutor {
    /// Resolved SSH key
    key: ResolvedKey,
    /// Bound on connect + authenticate
    connect_timeout: Duration,
    /// Open sessions keyed by target
    sessions: Mutex<HashMap<Target, client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("key", &self.key)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn new(key_source: &KeySource, connect_timeout: Duration) -> Result<Self, ExecError> {
        let key = key_source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        Ok(Self {
            key,
            connect_timeout,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Open and authenticate a session for `target`
    #[instrument(skip(self), fields(target = %target))]
    async fn open_session(
        &self,
        target: &Target,
    ) -> Result<client::Handle<SshClientHandler>, ExecError> {
        info!(
            host = %target.address,
            port = target.port,
            user = %target.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let mut session = client::connect(
            config,
            (target.address.as_str(), target.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        if self.key.use_agent() {
            return Err(ExecError::AuthenticationFailed(
                "SSH agent authentication is not supported; configure a key path".to_string(),
            ));
        }

        let Some(key_path) = self.key.path() else {
            return Err(ExecError::AuthenticationFailed(
                "no authentication method available".to_string(),
            ));
        };

        let key_pair =
            load_secret_key(key_path, None).map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &target.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(format!(
                "public key rejected for {target}"
            )));
        }

        info!(target = %target, "SSH connected and authenticated");
        Ok(session)
    }

    /// Make sure a session for `target` exists, bounded by the connect timeout
    async fn connect(&self, target: &Target) -> Result<(), ExecError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(target) {
            return Ok(());
        }

        let session = match timeout(self.connect_timeout, self.open_session(target)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(target = %target, timeout = ?self.connect_timeout, "SSH connect timed out");
                return Err(ExecError::Timeout {
                    timeout: self.connect_timeout,
                });
            }
        };

        sessions.insert(target.clone(), session);
        Ok(())
    }

    /// Execute command on an already connected target
    #[instrument(skip(self, cmd), fields(target = %target))]
    async fn execute_remote(&self, target: &Target, cmd: &str) -> Result<CommandResult, ExecError> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(target).ok_or_else(|| {
            ExecError::ConnectionFailed(format!("no session for {target}"))
        })?;

        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;
        drop(sessions);

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = exit_status.cast_signed();
                }
                Some(ChannelMsg::Eof) | None => break,
                _ => {}
            }
        }

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    /// Remote shell used by rsync for `target`
    fn rsync_shell(&self, target: &Target) -> String {
        let mut shell = format!(
            "ssh -p {} -o BatchMode=yes -o StrictHostKeyChecking=accept-new -o ConnectTimeout={}",
            target.port,
            self.connect_timeout.as_secs().max(1)
        );
        if let Some(path) = self.key.path() {
            shell.push_str(&format!(" -i {}", path.display()));
        }
        shell
    }

    /// Close every open session
    ///
    /// # Errors
    /// Returns `ExecError::IoError` if a disconnect fails
    pub async fn disconnect_all(&self) -> Result<(), ExecError> {
        let mut sessions = self.sessions.lock().await;

        for (target, session) in sessions.drain() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(target = %target, "SSH disconnected");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, cmd), fields(target = %target))]
    async fn run(
        &self,
        target: &Target,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        // Connect outside of the command timeout; it has its own bound
        self.connect(target).await?;

        match timeout(timeout_duration, self.execute_remote(target, cmd)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                // Drop a broken session so the next call reconnects
                self.sessions.lock().await.remove(target);
                Err(e)
            }
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self, request), fields(target = %target))]
    async fn transfer(
        &self,
        target: &Target,
        request: &TransferRequest,
        timeout_duration: Duration,
    ) -> Result<TransferResult, ExecError> {
        let mut remote_path = request.remote_path.clone();
        if !remote_path.ends_with('/') {
            remote_path.push('/');
        }
        let destination = target.rsync_destination(&remote_path);
        let shell = self.rsync_shell(target);
        let args = request.rsync_args(&destination, Some(&shell));
        run_rsync(args, timeout_duration).await
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.disconnect_all().await
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsync_shell_uses_target_port() {
        let executor = SshExecutor::new(&KeySource::Agent, Duration::from_secs(10)).unwrap();
        let shell = executor.rsync_shell(&Target::new("203.0.113.7", "dev").with_port(2222));

        assert!(shell.starts_with("ssh -p 2222 "));
        assert!(shell.contains("ConnectTimeout=10"));
        assert!(!shell.contains(" -i "));
    }

    #[tokio::test]
    async fn test_close_without_sessions() {
        let executor = SshExecutor::new(&KeySource::Agent, Duration::from_secs(5)).unwrap();
        executor.close().await.unwrap();
        assert!(executor.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_ssh_connection() {
        let executor = SshExecutor::new(&KeySource::Agent, Duration::from_secs(5)).unwrap();
        let result = executor
            .run(
                &Target::new("127.0.0.1", "root"),
                "true",
                Duration::from_secs(5),
            )
            .await;
        assert!(result.is_err());
    }
}
