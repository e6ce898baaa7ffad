//! provision-inventory: cloud inventory integration
//!
//! Creates and lists compute resources through a provider CLI and keeps a
//! cached name → address view for host resolution.

pub mod cache;
pub mod doctl;
pub mod error;
pub mod traits;
pub mod types;

pub use cache::InventoryCache;
pub use doctl::DoctlInventory;
pub use error::InventoryError;
pub use traits::Inventory;
pub use types::{Addresses, Resource, ResourceSpec, ResourceStatus};
