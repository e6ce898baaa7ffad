//! Progress events broadcast while phases run

use serde::Serialize;

use crate::phase::Phase;
use crate::steps::StepStatus;

/// Progress of a running phase, in emission order
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisionEvent {
    PhaseStarted {
        host: String,
        env: Option<String>,
        phase: Phase,
    },
    StepStarted {
        index: usize,
        total: usize,
        name: String,
    },
    StepFinished {
        index: usize,
        total: usize,
        name: String,
        status: StepStatus,
        detail: Option<String>,
    },
    PhaseFinished {
        host: String,
        env: Option<String>,
        phase: Phase,
        success: bool,
        warnings: usize,
    },
}

impl ProvisionEvent {
    /// `[n/total] <step>...` prefix shared by start and finish lines
    #[must_use]
    pub fn step_prefix(index: usize, total: usize, name: &str) -> String {
        format!("[{index}/{total}] {name}...")
    }
}
