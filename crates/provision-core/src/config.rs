//! Configuration types for provisioning phases

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything the phases need besides the environment table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Base port; each environment adds its offset
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Public key line deployed by bootstrap (read from `ssh.public_key_path`)
    #[serde(skip)]
    pub authorized_key: Option<String>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            source: SourceConfig::default(),
            sync: SyncConfig::default(),
            runtime: RuntimeConfig::default(),
            ssh: SshConfig::default(),
            timeouts: Timeouts::default(),
            authorized_key: None,
        }
    }
}

fn default_base_port() -> u16 {
    4000
}

/// Version-controlled source location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Clone URL
    #[serde(default)]
    pub repository: String,
    /// Checkout directory, relative to the environment user's home
    #[serde(default = "default_checkout_dir")]
    pub checkout_dir: String,
    /// Runtime root (generated config, secrets, process state), relative to home
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            checkout_dir: default_checkout_dir(),
            runtime_dir: default_runtime_dir(),
        }
    }
}

fn default_checkout_dir() -> String {
    "src/app".to_string()
}

fn default_runtime_dir() -> String {
    "runtime".to_string()
}

/// Operator-side configuration store mirrored by `sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root of `<env>/<component>/` trees
    #[serde(default = "default_local_store")]
    pub local_store: PathBuf,
    /// Never transferred, whatever components are requested
    #[serde(default = "default_secret_patterns")]
    pub secret_patterns: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_store: default_local_store(),
            secret_patterns: default_secret_patterns(),
        }
    }
}

fn default_local_store() -> PathBuf {
    PathBuf::from("envstore")
}

fn default_secret_patterns() -> Vec<String> {
    ["secrets.env", "*.secret", "local.env", "*.local"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Language runtime and process supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Node version passed to nvm
    #[serde(default = "default_node_version")]
    pub node_version: String,
    /// nvm release installed per user
    #[serde(default = "default_nvm_version")]
    pub nvm_version: String,
    /// OS packages installed during bootstrap
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    /// Process supervisor installed per user by `activate`
    #[serde(default = "default_supervisor")]
    pub supervisor: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_version: default_node_version(),
            nvm_version: default_nvm_version(),
            packages: default_packages(),
            supervisor: default_supervisor(),
        }
    }
}

fn default_node_version() -> String {
    "20".to_string()
}

fn default_nvm_version() -> String {
    "v0.40.1".to_string()
}

fn default_supervisor() -> String {
    "pm2".to_string()
}

fn default_packages() -> Vec<String> {
    ["git", "curl", "rsync", "build-essential"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// SSH access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Account used before environment users exist
    #[serde(default = "default_privileged_user")]
    pub privileged_user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key for every connection (falls back to ~/.ssh discovery)
    pub key_path: Option<PathBuf>,
    /// Public key deployed to the privileged account and every environment user
    pub public_key_path: Option<PathBuf>,
    /// Private key per host identifier, ahead of `key_path`
    #[serde(default)]
    pub hosts: BTreeMap<String, PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            privileged_user: default_privileged_user(),
            port: default_ssh_port(),
            key_path: None,
            public_key_path: None,
            hosts: BTreeMap::new(),
        }
    }
}

fn default_privileged_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

/// Per-call bounds, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    #[serde(default = "default_transfer_secs")]
    pub transfer_secs: u64,
    #[serde(default = "default_allocate_secs")]
    pub allocate_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
            transfer_secs: default_transfer_secs(),
            allocate_secs: default_allocate_secs(),
        }
    }
}

fn default_connect_secs() -> u64 {
    15
}

fn default_command_secs() -> u64 {
    900
}

fn default_transfer_secs() -> u64 {
    600
}

fn default_allocate_secs() -> u64 {
    600
}

impl Timeouts {
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub fn transfer(&self) -> Duration {
        Duration::from_secs(self.transfer_secs)
    }

    #[must_use]
    pub fn allocate(&self) -> Duration {
        Duration::from_secs(self.allocate_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: ProvisionerConfig =
            serde_json::from_str(r#"{"source": {"repository": "git@example.com:app.git"}}"#)
                .unwrap();

        assert_eq!(config.base_port, 4000);
        assert_eq!(config.source.checkout_dir, "src/app");
        assert!(config.sync.secret_patterns.contains(&"secrets.env".to_string()));
        assert_eq!(config.ssh.privileged_user, "root");
        assert_eq!(config.timeouts.connect(), Duration::from_secs(15));
        assert!(config.authorized_key.is_none());
    }

    #[test]
    fn test_default_matches_empty_document() {
        let parsed: ProvisionerConfig = serde_json::from_str("{}").unwrap();
        let built = ProvisionerConfig::default();

        assert_eq!(built.base_port, 4000);
        assert_eq!(built.base_port, parsed.base_port);
        assert_eq!(built.runtime.supervisor, parsed.runtime.supervisor);
        assert_eq!(built.ssh.port, 22);
    }
}
