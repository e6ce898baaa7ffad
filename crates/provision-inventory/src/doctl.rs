//! DigitalOcean inventory via the `doctl` CLI

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use provision_exec::{ExecError, RemoteExecutor, Target};

use crate::error::InventoryError;
use crate::traits::Inventory;
use crate::types::{Addresses, Resource, ResourceSpec, ResourceStatus};

#[derive(Debug, Deserialize)]
struct DropletRow {
    id: u64,
    name: String,
    status: ResourceStatus,
    #[serde(default)]
    networks: Networks,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkRow>,
}

#[derive(Debug, Deserialize)]
struct NetworkRow {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ReservedIpRow {
    ip: String,
    droplet: Option<DropletRef>,
}

#[derive(Debug, Deserialize)]
struct DropletRef {
    id: u64,
}

/// Inventory backed by `doctl`, run through a local executor
pub struct DoctlInventory {
    /// Executor that runs `doctl` (normally `LocalExecutor`)
    executor: Arc<dyn RemoteExecutor>,
    /// Authentication context (`doctl --context`)
    context: Option<String>,
    /// Per-call timeout for list operations
    timeout: Duration,
    /// Timeout for `droplet create --wait`
    create_timeout: Duration,
}

impl DoctlInventory {
    /// Create a new doctl-backed inventory
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            context: None,
            timeout: Duration::from_secs(60),
            create_timeout: Duration::from_secs(600),
        }
    }

    /// Use a named doctl auth context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set list and create timeouts
    #[must_use]
    pub fn with_timeouts(mut self, list: Duration, create: Duration) -> Self {
        self.timeout = list;
        self.create_timeout = create;
        self
    }

    fn doctl_cmd(&self, args: &str) -> String {
        match &self.context {
            Some(ctx) => format!("doctl --context {} {args} --output json", shell_quote(ctx)),
            None => format!("doctl {args} --output json"),
        }
    }

    fn create_args(spec: &ResourceSpec) -> String {
        let mut args = format!(
            "compute droplet create {} --size {} --region {} --image {} --wait",
            shell_quote(&spec.name),
            shell_quote(&spec.size),
            shell_quote(&spec.region),
            shell_quote(&spec.image),
        );
        if !spec.ssh_keys.is_empty() {
            args.push_str(&format!(" --ssh-keys {}", shell_quote(&spec.ssh_keys.join(","))));
        }
        if !spec.tags.is_empty() {
            args.push_str(&format!(" --tag-names {}", shell_quote(&spec.tags.join(","))));
        }
        args
    }

    #[instrument(skip(self))]
    async fn query<T: DeserializeOwned>(
        &self,
        args: &str,
        limit: Duration,
    ) -> Result<Vec<T>, InventoryError> {
        let cmd = self.doctl_cmd(args);
        debug!(command = %cmd, "running doctl");

        let result = self
            .executor
            .run(&Target::new("localhost", "operator"), &cmd, limit)
            .await
            .map_err(|e| match e {
                ExecError::Timeout { timeout } => InventoryError::Timeout(timeout),
                other => InventoryError::ExecutionError(other.to_string()),
            })?;

        if result.status == 127 {
            return Err(InventoryError::ToolNotFound("doctl".to_string()));
        }
        if !result.success() {
            return Err(InventoryError::CommandFailed(result.failure_summary()));
        }

        // doctl prints nothing (not `[]`) for some empty listings
        if result.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&result.stdout).map_err(|e| InventoryError::ParseError(e.to_string()))
    }

    fn parse_ip(raw: &str) -> Option<IpAddr> {
        match raw.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(address = raw, "ignoring unparseable address");
                None
            }
        }
    }

    fn merge(droplets: Vec<DropletRow>, reserved: Vec<ReservedIpRow>) -> Vec<Resource> {
        let floating: HashMap<u64, IpAddr> = reserved
            .into_iter()
            .filter_map(|r| Some((r.droplet?.id, Self::parse_ip(&r.ip)?)))
            .collect();

        droplets
            .into_iter()
            .map(|d| {
                let mut addresses = Addresses::default();
                for net in &d.networks.v4 {
                    let Some(ip) = Self::parse_ip(&net.ip_address) else {
                        continue;
                    };
                    match net.kind.as_str() {
                        "public" if addresses.public.is_none() => addresses.public = Some(ip),
                        "private" if addresses.private.is_none() => addresses.private = Some(ip),
                        _ => {}
                    }
                }
                addresses.floating = floating.get(&d.id).copied();
                Resource {
                    id: d.id.to_string(),
                    name: d.name,
                    status: d.status,
                    addresses,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Inventory for DoctlInventory {
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<String, InventoryError> {
        info!(size = %spec.size, region = %spec.region, image = %spec.image, "creating droplet");

        let rows: Vec<DropletRow> = self
            .query(&Self::create_args(spec), self.create_timeout)
            .await?;

        let droplet = rows.into_iter().next().ok_or_else(|| {
            InventoryError::ParseError("droplet create returned no rows".to_string())
        })?;

        info!(id = droplet.id, "droplet created");
        Ok(droplet.id.to_string())
    }

    #[instrument(skip(self))]
    async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError> {
        let droplets: Vec<DropletRow> = self.query("compute droplet list", self.timeout).await?;

        // Reserved IPs are optional garnish; a failure here must not hide droplets
        let reserved: Vec<ReservedIpRow> =
            match self.query("compute reserved-ip list", self.timeout).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "reserved IP listing failed");
                    Vec::new()
                }
            };

        let resources = Self::merge(droplets, reserved);
        debug!(count = resources.len(), "listed resources");
        Ok(resources)
    }

    fn provider(&self) -> &'static str {
        "doctl"
    }
}

/// Single-quote a value for `sh -c`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}
