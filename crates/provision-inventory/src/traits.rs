//! Inventory provider trait

use async_trait::async_trait;

use crate::error::InventoryError;
use crate::types::{Resource, ResourceSpec};

/// Cloud inventory: source of truth for host addresses after allocation
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Create a compute resource, returning its provider id
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<String, InventoryError>;

    /// List every resource with its current addresses
    async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError>;

    /// Short provider name (for logs)
    fn provider(&self) -> &'static str;
}
