//! Remote executor trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandResult, Target, TransferResult};
use crate::transfer::TransferRequest;

/// Blocking-style command and transfer channel to a resolved host
///
/// Every call carries its own timeout; the caller issues the next call only
/// after the previous one returns.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on `target` as `target.user`
    async fn run(
        &self,
        target: &Target,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Copy a local directory tree to `target`
    async fn transfer(
        &self,
        target: &Target,
        request: &TransferRequest,
        timeout: Duration,
    ) -> Result<TransferResult, ExecError>;

    /// Release open connections; later calls reconnect
    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Short identifier of the implementation (for logs)
    fn executor_type(&self) -> &'static str;
}
