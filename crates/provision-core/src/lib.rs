//! provision-core: Phase state machine and orchestration logic
//!
//! Drives a host through allocate → bootstrap → checkout → sync → activate,
//! recording completed phases per `host` / `host:env` so any phase can be
//! resumed after a partial failure.

pub mod actor;
pub mod bootstrap;
pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod message;
pub mod orchestrator;
pub mod phase;
pub mod resolver;
pub mod steps;
pub mod store;

pub use actor::{ProvisionActor, reply};
pub use bootstrap::{BootstrapSequencer, UserSummary};
pub use config::{ProvisionerConfig, RuntimeConfig, SourceConfig, SshConfig, SyncConfig, Timeouts};
pub use environment::{Environment, EnvironmentRegistry};
pub use error::{EnvFailure, ProvisionError};
pub use event::ProvisionEvent;
pub use message::{
    Activate, Allocate, Bootstrap, Checkout, EnvironmentTable, EventStream, Full, GetStatus,
    ListEnvironments, Reset, Resolve, StatusReport, Subscribe, SyncComponents,
};
pub use orchestrator::{ExecutorFactory, PhaseReport, Provisioner, ProvisionerArgs};
pub use phase::{Phase, PhaseKey, PhaseRecord};
pub use resolver::{HostResolver, LocalBindings, Resolution, ResolvedHost};
pub use steps::{
    OnFailure, RunAs, SequenceReport, Step, StepAction, StepOutcome, StepRunner, StepStatus,
};
pub use store::{FileStateStore, MemoryStateStore, PhaseStateStore, StoreError};
