//! Environment (isolation tier) registry

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::SourceConfig;
use crate::error::ProvisionError;

/// One isolation tier on a host: its own OS user, branch and port range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Tier name (`dev`, `staging`, `prod`)
    pub name: String,
    /// Branch checked out for this tier
    pub branch: String,
    /// Added to the base port so tiers sharing a host never collide
    #[serde(default)]
    pub port_offset: u16,
    /// Dedicated OS user
    pub user: String,
}

impl Environment {
    pub fn new(
        name: impl Into<String>,
        branch: impl Into<String>,
        port_offset: u16,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            branch: branch.into(),
            port_offset,
            user: user.into(),
        }
    }

    /// Port this tier listens on
    #[must_use]
    pub fn port(&self, base_port: u16) -> u16 {
        base_port.saturating_add(self.port_offset)
    }

    /// Home directory of the tier's user
    #[must_use]
    pub fn home(&self) -> String {
        format!("/home/{}", self.user)
    }

    /// Version-controlled code only
    #[must_use]
    pub fn source_root(&self, source: &SourceConfig) -> String {
        format!("{}/{}", self.home(), source.checkout_dir.trim_matches('/'))
    }

    /// Generated configuration, secrets and process state
    #[must_use]
    pub fn runtime_root(&self, source: &SourceConfig) -> String {
        format!("{}/{}", self.home(), source.runtime_dir.trim_matches('/'))
    }
}

/// Static, validated table of environments
#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    environments: Vec<Environment>,
}

impl EnvironmentRegistry {
    /// Validate and build a registry
    ///
    /// # Errors
    /// Returns `ProvisionError::Config` for an empty table or duplicate
    /// names, users or port offsets
    pub fn new(environments: Vec<Environment>) -> Result<Self, ProvisionError> {
        if environments.is_empty() {
            return Err(ProvisionError::Config(
                "at least one environment is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut users = HashSet::new();
        let mut offsets = HashSet::new();
        for env in &environments {
            if env.name.is_empty() || env.name.contains(':') {
                return Err(ProvisionError::Config(format!(
                    "invalid environment name: {:?}",
                    env.name
                )));
            }
            if !names.insert(env.name.as_str()) {
                return Err(ProvisionError::Config(format!(
                    "duplicate environment: {}",
                    env.name
                )));
            }
            if !users.insert(env.user.as_str()) {
                return Err(ProvisionError::Config(format!(
                    "user {} assigned to more than one environment",
                    env.user
                )));
            }
            if !offsets.insert(env.port_offset) {
                return Err(ProvisionError::Config(format!(
                    "port offset {} assigned to more than one environment",
                    env.port_offset
                )));
            }
        }

        Ok(Self { environments })
    }

    /// Get an environment by name
    ///
    /// # Errors
    /// Returns `ProvisionError::UnknownEnvironment` if absent
    pub fn get(&self, name: &str) -> Result<&Environment, ProvisionError> {
        self.environments
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ProvisionError::UnknownEnvironment(name.to_string()))
    }

    /// One named environment, or all of them
    ///
    /// # Errors
    /// Returns `ProvisionError::UnknownEnvironment` for an unknown name
    pub fn select(&self, name: Option<&str>) -> Result<Vec<Environment>, ProvisionError> {
        match name {
            Some(name) => Ok(vec![self.get(name)?.clone()]),
            None => Ok(self.environments.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.environments.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self {
            environments: vec![
                Environment::new("dev", "development", 0, "dev"),
                Environment::new("staging", "staging", 100, "staging"),
                Environment::new("prod", "main", 200, "prod"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers() {
        let registry = EnvironmentRegistry::default();
        assert_eq!(registry.len(), 3);

        let staging = registry.get("staging").unwrap();
        assert_eq!(staging.branch, "staging");
        assert_eq!(staging.port(4000), 4100);
        assert!(matches!(
            registry.get("qa"),
            Err(ProvisionError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_rejects_shared_user_and_offset() {
        let shared_user = EnvironmentRegistry::new(vec![
            Environment::new("dev", "development", 0, "app"),
            Environment::new("prod", "main", 200, "app"),
        ]);
        assert!(matches!(shared_user, Err(ProvisionError::Config(_))));

        let shared_offset = EnvironmentRegistry::new(vec![
            Environment::new("dev", "development", 0, "dev"),
            Environment::new("prod", "main", 0, "prod"),
        ]);
        assert!(matches!(shared_offset, Err(ProvisionError::Config(_))));

        assert!(EnvironmentRegistry::new(vec![]).is_err());
    }

    #[test]
    fn test_source_and_runtime_roots_are_disjoint() {
        let env = Environment::new("dev", "development", 0, "dev");
        let source = SourceConfig::default();

        assert_eq!(env.source_root(&source), "/home/dev/src/app");
        assert_eq!(env.runtime_root(&source), "/home/dev/runtime");
        assert!(!env.runtime_root(&source).starts_with(&env.source_root(&source)));
    }

    #[test]
    fn test_select_all_or_one() {
        let registry = EnvironmentRegistry::default();
        assert_eq!(registry.select(None).unwrap().len(), 3);
        assert_eq!(registry.select(Some("prod")).unwrap()[0].user, "prod");
    }
}
