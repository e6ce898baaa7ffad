//! Configuration loading and types

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use provision_core::{Environment, EnvironmentRegistry, LocalBindings, ProvisionerConfig};
use provision_exec::{ConfiguredCredentials, KeySource};
use provision_inventory::ResourceSpec;

/// Top-level configuration for the `provision` binary (`provision.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding one phase record file per context
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Provider account / organisation; also the record file name
    #[serde(default = "default_context")]
    pub context: String,
    /// Environment table
    #[serde(default = "default_environments", rename = "environment")]
    pub environments: Vec<Environment>,
    /// Phase settings (`base_port`, `[source]`, `[sync]`, `[runtime]`, `[ssh]`, `[timeouts]`)
    #[serde(flatten)]
    pub provisioner: ProvisionerConfig,
    /// Defaults for `create` / `full`
    #[serde(default)]
    pub allocate: AllocateDefaults,
    /// Inventory cache behaviour
    #[serde(default)]
    pub inventory: InventorySettings,
    /// Locally-bound names → addresses
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_dir: default_state_dir(),
            context: default_context(),
            environments: default_environments(),
            provisioner: ProvisionerConfig::default(),
            allocate: AllocateDefaults::default(),
            inventory: InventorySettings::default(),
            bindings: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("provision"))
        .unwrap_or_else(|| PathBuf::from(".provision"))
}

fn default_context() -> String {
    "default".to_string()
}

fn default_environments() -> Vec<Environment> {
    EnvironmentRegistry::default().iter().cloned().collect()
}

/// Resource defaults used when flags are omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateDefaults {
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for AllocateDefaults {
    fn default() -> Self {
        Self {
            size: default_size(),
            region: default_region(),
            image: default_image(),
            ssh_keys: Vec::new(),
            tags: Vec::new(),
        }
    }
}

fn default_size() -> String {
    "s-1vcpu-1gb".to_string()
}

fn default_region() -> String {
    "fra1".to_string()
}

fn default_image() -> String {
    "ubuntu-24-04-x64".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySettings {
    /// How long a listing is served from cache
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Poll interval while waiting for a new resource
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5
}

impl InventorySettings {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).wrap_err_with(|| format!("invalid {}", path.display()))?;
        Ok(config)
    }

    /// Load from `explicit`, `$PROVISION_CONFIG`, `./provision.toml` or the
    /// user config dir, in that order
    ///
    /// Returns the path used, or `None` when falling back to defaults.
    ///
    /// # Errors
    /// Returns error if the chosen file cannot be read or parsed
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var("PROVISION_CONFIG") {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        let mut paths = vec![PathBuf::from("provision.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("provision/provision.toml"));
        }

        for path in paths {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    /// Phase record file for the configured context
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.env", self.context))
    }

    /// Validated environment table
    ///
    /// # Errors
    /// Returns error for an empty table or duplicate names, users or offsets
    pub fn registry(&self) -> eyre::Result<EnvironmentRegistry> {
        Ok(EnvironmentRegistry::new(self.environments.clone())?)
    }

    /// `[bindings]` overlaid with a snapshot of address-valued variables
    ///
    /// # Errors
    /// Returns error if a `[bindings]` value is not an address
    pub fn bindings<I>(&self, snapshot: I) -> eyre::Result<LocalBindings>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut bindings = LocalBindings::new();
        for (name, value) in &self.bindings {
            let address: IpAddr = value
                .trim()
                .parse()
                .wrap_err_with(|| format!("bindings.{name} is not an address: {value}"))?;
            bindings.bind(name, address);
        }
        bindings.extend(LocalBindings::from_vars(snapshot));
        Ok(bindings)
    }

    /// Resource spec from defaults, with any flag overrides applied
    #[must_use]
    pub fn resource_spec(
        &self,
        name: &str,
        size: Option<String>,
        region: Option<String>,
        image: Option<String>,
    ) -> ResourceSpec {
        ResourceSpec {
            name: name.to_string(),
            size: size.unwrap_or_else(|| self.allocate.size.clone()),
            region: region.unwrap_or_else(|| self.allocate.region.clone()),
            image: image.unwrap_or_else(|| self.allocate.image.clone()),
            ssh_keys: self.allocate.ssh_keys.clone(),
            tags: self.allocate.tags.clone(),
        }
    }

    /// Public key line deployed by bootstrap
    ///
    /// Reads `ssh.public_key_path`, else the first of `~/.ssh/id_ed25519.pub`
    /// and `~/.ssh/id_rsa.pub` that exists.
    ///
    /// # Errors
    /// Returns error if the configured file cannot be read
    pub fn authorized_key(&self) -> eyre::Result<Option<String>> {
        if let Some(path) = &self.provisioner.ssh.public_key_path {
            let key = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("cannot read public key {}", path.display()))?;
            return Ok(first_key_line(&key));
        }

        let Some(home) = dirs::home_dir() else {
            return Ok(None);
        };
        for name in ["id_ed25519.pub", "id_rsa.pub"] {
            if let Ok(key) = std::fs::read_to_string(home.join(".ssh").join(name)) {
                return Ok(first_key_line(&key));
            }
        }
        Ok(None)
    }

    /// Bootstrap keys: `[ssh.hosts]` entries, then `ssh.key_path`, then discovery
    #[must_use]
    pub fn credentials(&self) -> ConfiguredCredentials {
        let ssh = &self.provisioner.ssh;
        let mut credentials = ConfiguredCredentials::new().with_candidates(Self::key_candidates());
        if let Some(key) = &ssh.key_path {
            credentials = credentials.with_default(KeySource::Path(key.clone()));
        }
        for (host, key) in &ssh.hosts {
            credentials = credentials.with_host(host, KeySource::Path(key.clone()));
        }
        credentials
    }

    /// Private keys tried when no key is configured
    #[must_use]
    pub fn key_candidates() -> Vec<PathBuf> {
        dirs::home_dir()
            .map(|home| {
                ["id_ed25519", "id_rsa"]
                    .into_iter()
                    .map(|name| home.join(".ssh").join(name))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn first_key_line(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use provision_exec::CredentialProvider;

    use super::*;

    const SAMPLE: &str = r#"
log_level = "info"
state_dir = "/var/lib/provision"
context = "acme"
base_port = 5000

[[environment]]
name = "dev"
branch = "develop"
port_offset = 0
user = "dev"

[[environment]]
name = "prod"
branch = "main"
port_offset = 200
user = "prod"

[source]
repository = "git@example.com:acme/app.git"

[sync]
local_store = "/srv/envstore"

[ssh]
privileged_user = "admin"
port = 2222

[timeouts]
connect_secs = 5

[allocate]
size = "s-2vcpu-4gb"
tags = ["web"]

[bindings]
web-1 = "192.0.2.10"
"#;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();

        assert_eq!(config.state_path(), PathBuf::from("/var/lib/provision/acme.env"));
        assert_eq!(config.provisioner.base_port, 5000);
        assert_eq!(config.provisioner.ssh.privileged_user, "admin");
        assert_eq!(config.provisioner.ssh.port, 2222);
        assert_eq!(config.provisioner.timeouts.connect(), Duration::from_secs(5));
        assert_eq!(config.provisioner.timeouts.command(), Duration::from_secs(900));
        assert_eq!(config.provisioner.source.checkout_dir, "src/app");
        assert_eq!(config.registry().unwrap().len(), 2);

        let spec = config.resource_spec("web-2", None, Some("ams3".to_string()), None);
        assert_eq!(spec.size, "s-2vcpu-4gb");
        assert_eq!(spec.region, "ams3");
        assert_eq!(spec.image, "ubuntu-24-04-x64");
        assert_eq!(spec.tags, vec!["web"]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.context, "default");
        assert_eq!(config.environments.len(), 3);
        assert_eq!(config.provisioner.base_port, 4000);
        assert!(config.provisioner.sync.secret_patterns.contains(&"secrets.env".to_string()));
    }

    #[test]
    fn test_snapshot_overrides_config_bindings() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let bindings = config
            .bindings([
                ("WEB_1".to_string(), "198.51.100.1".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ])
            .unwrap();

        assert_eq!(
            bindings.lookup("web-1"),
            Some("198.51.100.1".parse().unwrap())
        );
    }

    #[test]
    fn test_bad_binding_is_rejected() {
        let mut config = Config::default();
        config
            .bindings
            .insert("web-1".to_string(), "not-an-ip".to_string());
        assert!(config.bindings(Vec::new()).is_err());
    }

    #[test]
    fn test_duplicate_users_are_rejected() {
        let mut config = Config::default();
        config.environments[1].user = "dev".to_string();
        assert!(config.registry().is_err());
    }

    #[test]
    fn test_load_and_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("id.pub");
        std::fs::write(&key_path, "\nssh-ed25519 AAAA operator@laptop\n").unwrap();

        let config_path = dir.path().join("provision.toml");
        std::fs::write(
            &config_path,
            format!("[ssh]\npublic_key_path = {:?}\n", key_path.display().to_string()),
        )
        .unwrap();

        let (config, used) = Config::load_default(Some(config_path.as_path())).unwrap();
        assert_eq!(used, Some(config_path));
        assert_eq!(
            config.authorized_key().unwrap().as_deref(),
            Some("ssh-ed25519 AAAA operator@laptop")
        );
    }

    #[test]
    fn test_per_host_keys_take_precedence() {
        let config: Config = toml::from_str(
            r#"
[ssh]
key_path = "/keys/default"

[ssh.hosts]
web-1 = "/keys/web1"
"#,
        )
        .unwrap();
        let credentials = config.credentials();

        assert_eq!(
            credentials.bootstrap_credential("web-1").unwrap(),
            KeySource::Path(PathBuf::from("/keys/web1"))
        );
        assert_eq!(
            credentials.bootstrap_credential("web-2").unwrap(),
            KeySource::Path(PathBuf::from("/keys/default"))
        );
    }

    #[test]
    fn test_default_config_keeps_base_port() {
        assert_eq!(Config::default().provisioner.base_port, 4000);
    }
}
