//! Message types for `ProvisionActor`
//!
//! Message handlers are implemented in the actor module.

use kameo_macros::Reply;
use tokio::sync::broadcast;

use provision_inventory::ResourceSpec;

use crate::environment::Environment;
use crate::event::ProvisionEvent;
use crate::phase::{PhaseKey, PhaseRecord};

// ============================================================================
// Phases
// ============================================================================

/// Create or adopt a compute resource
#[derive(Debug)]
pub struct Allocate {
    pub spec: ResourceSpec,
    /// Report what would be created without calling the provider
    pub dry_run: bool,
}

/// Run the bootstrap sequence on a host
#[derive(Debug)]
pub struct Bootstrap {
    pub host: String,
}

/// Clone or fast-forward source checkouts
#[derive(Debug)]
pub struct Checkout {
    pub host: String,
    /// One environment, or all when `None`
    pub env: Option<String>,
}

/// Mirror runtime configuration for one environment
#[derive(Debug)]
pub struct SyncComponents {
    pub host: String,
    pub env: String,
    /// Components to mirror; empty means every local component
    pub components: Vec<String>,
}

/// Install runtime and dependencies, start the supervisor
#[derive(Debug)]
pub struct Activate {
    pub host: String,
    pub env: String,
}

/// Every phase in order
#[derive(Debug)]
pub struct Full {
    pub spec: ResourceSpec,
    /// One environment, or all when `None`
    pub env: Option<String>,
}

// ============================================================================
// Records and lookups
// ============================================================================

/// Get phase records
#[derive(Debug)]
pub struct GetStatus {
    /// Only this host's keys
    pub host: Option<String>,
}

/// Phase records, ordered by key
#[derive(Debug, Clone, Reply)]
pub struct StatusReport {
    pub records: Vec<(PhaseKey, PhaseRecord)>,
}

/// Clear phase records
#[derive(Debug)]
pub struct Reset {
    pub host: String,
    /// One environment key, or the host and all its environments
    pub env: Option<String>,
}

/// Resolve a host identifier
#[derive(Debug)]
pub struct Resolve {
    pub identifier: String,
}

/// List configured environments
#[derive(Debug)]
pub struct ListEnvironments;

/// Environment table with the base port it offsets from
#[derive(Debug, Clone, Reply)]
pub struct EnvironmentTable {
    pub base_port: u16,
    pub environments: Vec<Environment>,
}

/// Subscribe to progress events
#[derive(Debug)]
pub struct Subscribe;

/// Receiver for progress events
#[derive(Debug, Reply)]
pub struct EventStream(pub broadcast::Receiver<ProvisionEvent>);
