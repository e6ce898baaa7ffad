//! Executor factory: SSH for remote hosts, local shell for loopback

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use provision_core::{ExecutorFactory, ProvisionError, ResolvedHost};
use provision_exec::{KeySource, LocalExecutor, RemoteExecutor, SshExecutor};

/// Default implementation of `ExecutorFactory`
pub struct DefaultExecutorFactory {
    connect_timeout: Duration,
}

impl DefaultExecutorFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ExecutorFactory for DefaultExecutorFactory {
    async fn create_executor(
        &self,
        host: &ResolvedHost,
        credential: &KeySource,
    ) -> Result<Arc<dyn RemoteExecutor>, ProvisionError> {
        // Loopback runs as the operator, whatever user a step asks for
        if host.address.is_loopback() {
            debug!(host = %host.identifier, "using local executor");
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let executor = SshExecutor::new(credential, self.connect_timeout).map_err(|e| {
            ProvisionError::Credential(format!("{}: {e}", host.identifier))
        })?;
        debug!(host = %host.identifier, address = %host.address, "using SSH executor");
        Ok(Arc::new(executor))
    }
}

#[cfg(test)]
mod tests {
    use provision_core::Resolution;

    use super::*;

    #[tokio::test]
    async fn test_loopback_uses_local_executor() {
        let factory = DefaultExecutorFactory::new(Duration::from_secs(1));
        let host = ResolvedHost {
            identifier: "localhost".to_string(),
            address: "127.0.0.1".parse().unwrap(),
            via: Resolution::Bound,
        };

        let executor = factory
            .create_executor(&host, &KeySource::Agent)
            .await
            .unwrap();
        assert_eq!(executor.executor_type(), "local");
    }
}
