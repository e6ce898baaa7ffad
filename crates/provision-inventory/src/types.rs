//! Inventory type definitions

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Network addresses of one compute resource, at most one of each kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    /// Internet-facing address
    pub public: Option<IpAddr>,
    /// VPC/private network address
    pub private: Option<IpAddr>,
    /// Reassignable (reserved) address
    pub floating: Option<IpAddr>,
}

impl Addresses {
    /// Whether no address of any kind is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.public.is_none() && self.private.is_none() && self.floating.is_none()
    }
}

/// Provider-reported lifecycle of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Being created
    New,
    /// Running
    Active,
    /// Powered off
    Off,
    /// Archived
    Archive,
    /// Anything the provider adds later
    #[serde(other)]
    Unknown,
}

/// One compute resource as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Provider id
    pub id: String,
    /// Logical name
    pub name: String,
    /// Lifecycle status
    pub status: ResourceStatus,
    /// Known addresses
    pub addresses: Addresses,
}

impl Resource {
    /// Running and reachable from outside
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ResourceStatus::Active && self.addresses.public.is_some()
    }
}

/// What to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Logical name
    pub name: String,
    /// Sizing slug
    pub size: String,
    /// Region slug
    pub region: String,
    /// Image slug
    pub image: String,
    /// Provider SSH key ids or fingerprints installed at creation
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Tags applied at creation
    #[serde(default)]
    pub tags: Vec<String>,
}
