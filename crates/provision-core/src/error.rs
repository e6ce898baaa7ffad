//! Core error types for provision-core

use thiserror::Error;

use provision_inventory::InventoryError;

use crate::phase::Phase;
use crate::steps::OnFailure;
use crate::store::StoreError;

/// One environment's failure inside a per-environment loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFailure {
    /// Environment name
    pub env: String,
    /// What went wrong
    pub reason: String,
}

fn list_failures(failures: &[EnvFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.env, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while provisioning
#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    /// Not a literal address, not a bound name, not in the inventory
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Remote channel unreachable or unauthenticated
    #[error("cannot reach {host}: {reason}")]
    ConnectivityFailure {
        /// Host identifier
        host: String,
        /// Underlying error
        reason: String,
    },

    /// A remote step failed
    #[error("step '{step}' failed (on failure: {policy}): {reason}")]
    StepFailure {
        /// Step name
        step: String,
        /// Abort policy of the failing step
        policy: OnFailure,
        /// Underlying error
        reason: String,
    },

    /// Mirroring transfer failed
    #[error("transfer of '{component}' failed: {reason}")]
    TransferFailure {
        /// Component being mirrored
        component: String,
        /// Underlying error
        reason: String,
    },

    /// Provider rejected or timed out creating a resource
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// Phase invoked before its predecessor recorded success
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Some environments of a per-environment loop failed
    #[error("{phase} failed for {}", list_failures(.failures))]
    EnvironmentsFailed {
        /// Phase that ran the loop
        phase: Phase,
        /// Failed environments, in loop order
        failures: Vec<EnvFailure>,
    },

    /// A multi-phase run stopped at `phase`
    #[error("stopped at {phase}: {source}\n  resume with: {resume}")]
    Aborted {
        /// Phase that failed
        phase: Phase,
        /// Exact command to resume from that phase
        resume: String,
        /// Why the phase failed
        source: Box<ProvisionError>,
    },

    /// Environment name not in the registry
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Inventory provider error
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// No usable bootstrap credential
    #[error("credential error: {0}")]
    Credential(String),

    /// Phase store error
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    Actor(String),
}

impl ProvisionError {
    /// Phase to resume from, if this error came out of a multi-phase run
    #[must_use]
    pub fn resume_command(&self) -> Option<&str> {
        match self {
            ProvisionError::Aborted { resume, .. } => Some(resume),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_failures_display() {
        let err = ProvisionError::EnvironmentsFailed {
            phase: Phase::SourceChecked,
            failures: vec![
                EnvFailure {
                    env: "staging".to_string(),
                    reason: "branch not found".to_string(),
                },
                EnvFailure {
                    env: "prod".to_string(),
                    reason: "timed out".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "source-checked failed for staging: branch not found; prod: timed out"
        );
    }

    #[test]
    fn test_aborted_carries_resume_command() {
        let err = ProvisionError::Aborted {
            phase: Phase::Bootstrapped,
            resume: "provision bootstrap web-1".to_string(),
            source: Box::new(ProvisionError::ConnectivityFailure {
                host: "web-1".to_string(),
                reason: "timed out after 15s".to_string(),
            }),
        };
        assert_eq!(err.resume_command(), Some("provision bootstrap web-1"));
        assert!(err.to_string().contains("resume with: provision bootstrap web-1"));
    }
}
