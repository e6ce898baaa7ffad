//! Host identifier → address resolution

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, instrument};

use provision_inventory::InventoryCache;

use crate::error::ProvisionError;

/// Locally-bound names, captured once and passed explicitly
///
/// Names are normalised (upper-case, `-` and `.` → `_`) so `web-1`,
/// `WEB_1` and `web.1` all bind the same slot.
#[derive(Debug, Clone, Default)]
pub struct LocalBindings {
    bindings: HashMap<String, IpAddr>,
}

impl LocalBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalised binding name for an identifier
    #[must_use]
    pub fn normalize(identifier: &str) -> String {
        identifier
            .trim()
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }

    /// Bind `name` to `address`
    pub fn bind(&mut self, name: &str, address: IpAddr) {
        self.bindings.insert(Self::normalize(name), address);
    }

    /// Build from `(name, value)` pairs, keeping only values that are addresses
    ///
    /// Used with a one-time snapshot of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut bindings = Self::new();
        for (name, value) in vars {
            if let Ok(address) = value.as_ref().trim().parse::<IpAddr>() {
                bindings.bind(name.as_ref(), address);
            }
        }
        bindings
    }

    /// Overlay another set of bindings (theirs win)
    pub fn extend(&mut self, other: LocalBindings) {
        self.bindings.extend(other.bindings);
    }

    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<IpAddr> {
        self.bindings.get(&Self::normalize(identifier)).copied()
    }
}

/// Which stage produced an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The identifier was itself an address
    Literal,
    /// A locally-bound name
    Bound,
    /// The inventory's public address
    Inventory,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::Literal => "literal",
            Resolution::Bound => "bound",
            Resolution::Inventory => "inventory",
        })
    }
}

/// Result of resolving a host identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub identifier: String,
    pub address: IpAddr,
    pub via: Resolution,
}

/// Maps identifiers to addresses: literal, then bound name, then inventory
///
/// First match wins; a later stage is never consulted once an earlier one
/// matched, so an operator can always override stale inventory data.
pub struct HostResolver {
    bindings: LocalBindings,
    inventory: Arc<InventoryCache>,
}

impl HostResolver {
    pub fn new(bindings: LocalBindings, inventory: Arc<InventoryCache>) -> Self {
        Self {
            bindings,
            inventory,
        }
    }

    /// Resolve `identifier` to one usable address
    ///
    /// # Errors
    /// Returns `ProvisionError::HostNotFound` when every stage misses, or
    /// `ProvisionError::Inventory` when the inventory cannot be listed
    #[instrument(skip(self))]
    pub async fn resolve(&self, identifier: &str) -> Result<ResolvedHost, ProvisionError> {
        let identifier = identifier.trim();

        if let Ok(address) = identifier.parse::<IpAddr>() {
            return Ok(self.found(identifier, address, Resolution::Literal));
        }

        if let Some(address) = self.bindings.lookup(identifier) {
            return Ok(self.found(identifier, address, Resolution::Bound));
        }

        if let Some(resource) = self.inventory.find_by_name(identifier).await?
            && let Some(address) = resource.addresses.public
        {
            return Ok(self.found(identifier, address, Resolution::Inventory));
        }

        Err(ProvisionError::HostNotFound(identifier.to_string()))
    }

    fn found(&self, identifier: &str, address: IpAddr, via: Resolution) -> ResolvedHost {
        debug!(identifier, %address, %via, "host resolved");
        ResolvedHost {
            identifier: identifier.to_string(),
            address,
            via,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use provision_inventory::{
        Addresses, Inventory, InventoryError, Resource, ResourceSpec, ResourceStatus,
    };

    use super::*;

    struct OneHost;

    #[async_trait]
    impl Inventory for OneHost {
        async fn create_resource(&self, _spec: &ResourceSpec) -> Result<String, InventoryError> {
            Err(InventoryError::CommandFailed("read-only".to_string()))
        }

        async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError> {
            Ok(vec![Resource {
                id: "1".to_string(),
                name: "web-1".to_string(),
                status: ResourceStatus::Active,
                addresses: Addresses {
                    public: Some("203.0.113.7".parse().unwrap()),
                    private: Some("10.0.0.7".parse().unwrap()),
                    floating: None,
                },
            }])
        }

        fn provider(&self) -> &'static str {
            "fake"
        }
    }

    fn resolver(bindings: LocalBindings) -> HostResolver {
        HostResolver::new(
            bindings,
            Arc::new(InventoryCache::new(Arc::new(OneHost), Duration::from_secs(60))),
        )
    }

    #[test]
    fn test_normalize() {
        assert_eq!(LocalBindings::normalize("web-1.lab"), "WEB_1_LAB");
    }

    #[tokio::test]
    async fn test_literal_address_wins() {
        let mut bindings = LocalBindings::new();
        bindings.bind("198.51.100.1", "192.0.2.1".parse().unwrap());

        let host = resolver(bindings).resolve("198.51.100.1").await.unwrap();
        assert_eq!(host.address, "198.51.100.1".parse::<IpAddr>().unwrap());
        assert_eq!(host.via, Resolution::Literal);
    }

    #[tokio::test]
    async fn test_bound_name_beats_inventory() {
        let bindings = LocalBindings::from_vars([
            ("WEB_1", "192.0.2.50"),
            ("HOME", "/root"),
        ]);

        let host = resolver(bindings).resolve("web-1").await.unwrap();
        assert_eq!(host.address, "192.0.2.50".parse::<IpAddr>().unwrap());
        assert_eq!(host.via, Resolution::Bound);
    }

    #[tokio::test]
    async fn test_inventory_public_address() {
        let host = resolver(LocalBindings::new()).resolve("web-1").await.unwrap();
        assert_eq!(host.address, "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(host.via, Resolution::Inventory);
    }

    #[tokio::test]
    async fn test_not_found() {
        let err = resolver(LocalBindings::new())
            .resolve("db-9")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::HostNotFound(h) if h == "db-9"));
    }
}
