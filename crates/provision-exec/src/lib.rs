//! provision-exec: Remote execution abstraction
//!
//! Runs commands and mirrors directory trees on resolved hosts, locally or
//! via SSH, under a given OS user.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;
pub mod transfer;

pub use error::ExecError;
pub use keys::{ConfiguredCredentials, CredentialProvider, KeyError, KeySource, ResolvedKey};
pub use local::LocalExecutor;
pub use result::{CommandResult, Target, TransferResult};
pub use ssh::SshExecutor;
pub use traits::RemoteExecutor;
pub use transfer::TransferRequest;
