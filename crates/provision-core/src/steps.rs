//! Ordered remote steps with per-step abort policy

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use provision_exec::{ExecError, RemoteExecutor, Target, TransferRequest};

use crate::error::ProvisionError;
use crate::event::ProvisionEvent;

/// What a failing step does to the rest of its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Halt the sequence; the phase fails
    Abort,
    /// Record a warning and carry on
    Continue,
}

impl fmt::Display for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OnFailure::Abort => "abort",
            OnFailure::Continue => "continue",
        })
    }
}

/// OS identity a step runs under
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAs {
    Privileged,
    User(String),
}

#[derive(Debug, Clone)]
pub enum StepAction {
    /// Shell command
    Command(String),
    /// Mirror a local tree for one component
    Transfer {
        component: String,
        request: TransferRequest,
    },
    /// Nothing to do; reported as a warning with the reason
    Skip(String),
}

/// One named, idempotent remote operation
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub run_as: RunAs,
    pub action: StepAction,
    pub on_failure: OnFailure,
    /// Overrides the runner's default timeout
    pub timeout: Option<Duration>,
    /// Failure means the channel itself is unusable
    pub probe: bool,
}

impl Step {
    /// Privileged shell command that aborts the sequence on failure
    pub fn command(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_as: RunAs::Privileged,
            action: StepAction::Command(cmd.into()),
            on_failure: OnFailure::Abort,
            timeout: None,
            probe: false,
        }
    }

    /// Trivial authenticated round trip
    pub fn probe(name: impl Into<String>, timeout: Duration) -> Self {
        let mut step = Self::command(name, "true");
        step.timeout = Some(timeout);
        step.probe = true;
        step
    }

    /// Mirroring transfer of one component, aborting on failure
    pub fn transfer(
        name: impl Into<String>,
        component: impl Into<String>,
        request: TransferRequest,
    ) -> Self {
        Self {
            name: name.into(),
            run_as: RunAs::Privileged,
            action: StepAction::Transfer {
                component: component.into(),
                request,
            },
            on_failure: OnFailure::Abort,
            timeout: None,
            probe: false,
        }
    }

    /// Placeholder that only reports why it did nothing
    pub fn skip(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_as: RunAs::Privileged,
            action: StepAction::Skip(reason.into()),
            on_failure: OnFailure::Continue,
            timeout: None,
            probe: false,
        }
    }

    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as = RunAs::User(user.into());
        self
    }

    #[must_use]
    pub fn continue_on_failure(mut self) -> Self {
        self.on_failure = OnFailure::Continue;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    /// Failed under `OnFailure::Abort`
    Failed,
    /// Failed under `OnFailure::Continue`
    Warned,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStatus::Ok => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Warned => "warn",
            StepStatus::Skipped => "skipped",
        })
    }
}

/// What happened to one step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// 1-based position in the sequence
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub on_failure: OnFailure,
    /// Failure or skip reason
    pub detail: Option<String>,
    /// Command stdout / transfer itemization
    pub output: String,
    /// Set when the failing step was the probe or the channel broke
    pub unreachable: bool,
    /// Component of a transfer step
    pub component: Option<String>,
}

/// Outcomes of one sequence, in execution order
///
/// Steps after an aborting failure never ran and have no outcome.
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub outcomes: Vec<StepOutcome>,
    /// Steps declared, including any that never ran
    pub total: usize,
}

impl SequenceReport {
    /// No aborting step failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().is_none()
    }

    /// The aborting failure, if any
    #[must_use]
    pub fn failed(&self) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.status == StepStatus::Failed)
    }

    /// Non-aborting failures and skips
    #[must_use]
    pub fn warnings(&self) -> Vec<&StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StepStatus::Warned | StepStatus::Skipped))
            .collect()
    }

    /// Outcome by step name
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Typed error for the aborting failure
    #[must_use]
    pub fn error(&self, host: &str) -> Option<ProvisionError> {
        let failed = self.failed()?;
        let reason = failed.detail.clone().unwrap_or_default();
        Some(if failed.unreachable {
            ProvisionError::ConnectivityFailure {
                host: host.to_string(),
                reason,
            }
        } else if let Some(component) = &failed.component {
            ProvisionError::TransferFailure {
                component: component.clone(),
                reason,
            }
        } else {
            ProvisionError::StepFailure {
                step: failed.name.clone(),
                policy: failed.on_failure,
                reason,
            }
        })
    }
}

/// Executes steps strictly in order against one host
pub struct StepRunner<'a> {
    executor: &'a dyn RemoteExecutor,
    privileged: &'a Target,
    events: &'a broadcast::Sender<ProvisionEvent>,
    command_timeout: Duration,
    transfer_timeout: Duration,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        privileged: &'a Target,
        events: &'a broadcast::Sender<ProvisionEvent>,
    ) -> Self {
        Self {
            executor,
            privileged,
            events,
            command_timeout: Duration::from_secs(900),
            transfer_timeout: Duration::from_secs(600),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, command: Duration, transfer: Duration) -> Self {
        self.command_timeout = command;
        self.transfer_timeout = transfer;
        self
    }

    fn target(&self, run_as: &RunAs) -> Target {
        match run_as {
            RunAs::Privileged => self.privileged.clone(),
            RunAs::User(user) => self.privileged.as_user(user),
        }
    }

    /// Run `steps` in order, stopping at the first aborting failure
    pub async fn run(&self, steps: &[Step]) -> SequenceReport {
        let total = steps.len();
        let mut report = SequenceReport {
            outcomes: Vec::with_capacity(total),
            total,
        };

        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;
            // No subscribers is fine
            let _ = self.events.send(ProvisionEvent::StepStarted {
                index,
                total,
                name: step.name.clone(),
            });

            let outcome = self.run_step(index, step).await;

            match outcome.status {
                StepStatus::Ok => info!(step = %step.name, index, total, "step ok"),
                StepStatus::Failed => error!(
                    step = %step.name,
                    reason = outcome.detail.as_deref().unwrap_or(""),
                    "step failed, aborting sequence"
                ),
                StepStatus::Warned | StepStatus::Skipped => warn!(
                    step = %step.name,
                    status = %outcome.status,
                    reason = outcome.detail.as_deref().unwrap_or(""),
                    "step did not complete, continuing"
                ),
            }

            let _ = self.events.send(ProvisionEvent::StepFinished {
                index,
                total,
                name: step.name.clone(),
                status: outcome.status,
                detail: outcome.detail.clone(),
            });

            let abort = outcome.status == StepStatus::Failed;
            report.outcomes.push(outcome);
            if abort {
                break;
            }
        }

        report
    }

    async fn run_step(&self, index: usize, step: &Step) -> StepOutcome {
        let target = self.target(&step.run_as);
        let mut component = None;

        let result: Result<String, (String, bool)> = match &step.action {
            StepAction::Command(cmd) => {
                let limit = step.timeout.unwrap_or(self.command_timeout);
                match self.executor.run(&target, cmd, limit).await {
                    Ok(r) if r.success() => Ok(r.stdout),
                    Ok(r) => Err((r.failure_summary(), false)),
                    Err(e) => Err((e.to_string(), channel_broken(&e))),
                }
            }
            StepAction::Transfer {
                component: name,
                request,
            } => {
                component = Some(name.clone());
                let limit = step.timeout.unwrap_or(self.transfer_timeout);
                match self.executor.transfer(&target, request, limit).await {
                    Ok(t) => Ok(t.output),
                    Err(e) => Err((e.to_string(), channel_broken(&e))),
                }
            }
            StepAction::Skip(reason) => {
                return StepOutcome {
                    index,
                    name: step.name.clone(),
                    status: StepStatus::Skipped,
                    on_failure: step.on_failure,
                    detail: Some(reason.clone()),
                    output: String::new(),
                    unreachable: false,
                    component: None,
                };
            }
        };

        match result {
            Ok(output) => StepOutcome {
                index,
                name: step.name.clone(),
                status: StepStatus::Ok,
                on_failure: step.on_failure,
                detail: None,
                output,
                unreachable: false,
                component,
            },
            Err((detail, broken)) => StepOutcome {
                index,
                name: step.name.clone(),
                status: match step.on_failure {
                    OnFailure::Abort => StepStatus::Failed,
                    OnFailure::Continue => StepStatus::Warned,
                },
                on_failure: step.on_failure,
                detail: Some(detail),
                output: String::new(),
                unreachable: step.probe || broken,
                component,
            },
        }
    }
}

/// The channel failed, not the command
fn channel_broken(e: &ExecError) -> bool {
    e.is_connectivity() && !matches!(e, ExecError::Timeout { .. })
}

/// Single-quote a value for a POSIX shell
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use provision_exec::{CommandResult, TransferResult};

    use super::*;

    /// Fails any command containing one of `failing`
    struct ScriptedExecutor {
        failing: Vec<&'static str>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn run(
            &self,
            target: &Target,
            cmd: &str,
            _timeout: Duration,
        ) -> Result<CommandResult, ExecError> {
            self.calls
                .lock()
                .unwrap()
                .push((target.user.clone(), cmd.to_string()));
            let fail = self.failing.iter().any(|f| cmd.contains(f));
            Ok(CommandResult {
                status: i32::from(fail),
                stdout: "done\n".to_string(),
                stderr: if fail { "boom\n".to_string() } else { String::new() },
                duration: Duration::ZERO,
            })
        }

        async fn transfer(
            &self,
            _target: &Target,
            _request: &TransferRequest,
            timeout: Duration,
        ) -> Result<TransferResult, ExecError> {
            Err(ExecError::Timeout { timeout })
        }

        fn executor_type(&self) -> &'static str {
            "scripted"
        }
    }

    async fn run_steps(executor: &ScriptedExecutor, steps: &[Step]) -> SequenceReport {
        let target = Target::new("203.0.113.7", "root");
        let (tx, _rx) = broadcast::channel(64);
        StepRunner::new(executor, &target, &tx).run(steps).await
    }

    #[tokio::test]
    async fn test_continue_failure_is_warning() {
        let executor = ScriptedExecutor {
            failing: vec!["optional"],
            calls: Mutex::new(Vec::new()),
        };
        let steps = vec![
            Step::command("first", "echo first"),
            Step::command("second", "optional thing").continue_on_failure(),
            Step::command("third", "echo third").as_user("dev"),
        ];

        let report = run_steps(&executor, &steps).await;

        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(report.warnings()[0].detail.as_deref(), Some("boom"));
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[2].0, "dev");
    }

    #[tokio::test]
    async fn test_abort_halts_remaining_steps() {
        let executor = ScriptedExecutor {
            failing: vec!["apt-get"],
            calls: Mutex::new(Vec::new()),
        };
        let steps = vec![
            Step::command("packages", "apt-get install -y git"),
            Step::command("never", "echo unreachable"),
        ];

        let report = run_steps(&executor, &steps).await;

        assert!(!report.is_success());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.total, 2);
        assert!(matches!(
            report.error("web-1"),
            Some(ProvisionError::StepFailure { step, policy: OnFailure::Abort, .. }) if step == "packages"
        ));
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_is_connectivity() {
        let executor = ScriptedExecutor {
            failing: vec!["true"],
            calls: Mutex::new(Vec::new()),
        };
        let report = run_steps(
            &executor,
            &[Step::probe("probe", Duration::from_secs(1)), Step::command("x", "echo")],
        )
        .await;
        assert!(matches!(
            report.error("web-1"),
            Some(ProvisionError::ConnectivityFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_transfer_failure_names_component() {
        let executor = ScriptedExecutor {
            failing: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let request = TransferRequest::new("/tmp/a", "/home/dev/runtime/api").mirrored();
        let report = run_steps(&executor, &[Step::transfer("sync api", "api", request)]).await;

        assert!(matches!(
            report.error("web-1"),
            Some(ProvisionError::TransferFailure { component, .. }) if component == "api"
        ));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }
}
