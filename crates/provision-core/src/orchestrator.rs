//! `Provisioner`: the phase state machine
//!
//! Drives one host through allocate → bootstrap → checkout → sync →
//! activate. Every phase re-checks its predecessor in the phase store, runs
//! its steps through a `RemoteExecutor`, and records itself only on success.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use provision_exec::{CredentialProvider, KeySource, RemoteExecutor, Target, TransferRequest};
use provision_inventory::{Addresses, InventoryCache, ResourceSpec};

use crate::bootstrap::{BootstrapSequencer, NVM_INSTALLER, UserSummary};
use crate::config::ProvisionerConfig;
use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::{EnvFailure, ProvisionError};
use crate::event::ProvisionEvent;
use crate::phase::{Phase, PhaseKey, PhaseRecord};
use crate::resolver::{HostResolver, LocalBindings, ResolvedHost};
use crate::steps::{SequenceReport, Step, StepRunner, shell_quote};
use crate::store::PhaseStateStore;

/// Builds the remote executor for a resolved host
///
/// Allows injection of SSH, local or fake executors.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Create an executor that reaches `host` with `credential`
    async fn create_executor(
        &self,
        host: &ResolvedHost,
        credential: &KeySource,
    ) -> Result<Arc<dyn RemoteExecutor>, ProvisionError>;
}

/// Everything a `Provisioner` is built from
pub struct ProvisionerArgs {
    pub config: ProvisionerConfig,
    pub registry: EnvironmentRegistry,
    /// Snapshot of locally-bound names
    pub bindings: LocalBindings,
    pub inventory: Arc<InventoryCache>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub executors: Arc<dyn ExecutorFactory>,
    pub store: Box<dyn PhaseStateStore>,
    /// Progress event channel capacity
    pub event_channel_capacity: usize,
}

/// Outcome of one successful phase
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub host: String,
    /// Environments the phase ran for (empty for host-scoped phases)
    pub envs: Vec<String>,
    /// Address the phase talked to, or the allocated public address
    pub address: Option<IpAddr>,
    /// Non-aborting failures and skips, as `step: reason`
    pub warnings: Vec<String>,
    /// Users bootstrap created on this run
    pub users_created: Vec<String>,
    /// Nothing was changed
    pub dry_run: bool,
}

impl PhaseReport {
    fn new(phase: Phase, host: &str) -> Self {
        Self {
            phase,
            host: host.to_string(),
            envs: Vec::new(),
            address: None,
            warnings: Vec::new(),
            users_created: Vec::new(),
            dry_run: false,
        }
    }

    fn with_sequence(mut self, report: &SequenceReport) -> Self {
        self.warnings.extend(report.warnings().into_iter().map(|o| {
            format!("{}: {}", o.name, o.detail.as_deref().unwrap_or("failed"))
        }));
        self
    }
}

/// A resolved host with its executor and privileged identity
struct HostContext {
    resolved: ResolvedHost,
    executor: Arc<dyn RemoteExecutor>,
    privileged: Target,
}

/// Provisioning orchestrator for one operator process
pub struct Provisioner {
    config: ProvisionerConfig,
    registry: EnvironmentRegistry,
    resolver: HostResolver,
    inventory: Arc<InventoryCache>,
    credentials: Arc<dyn CredentialProvider>,
    executors: Arc<dyn ExecutorFactory>,
    /// Executors already built this session, by host identifier
    connected: HashMap<String, Arc<dyn RemoteExecutor>>,
    store: Box<dyn PhaseStateStore>,
    event_tx: broadcast::Sender<ProvisionEvent>,
}

impl Provisioner {
    #[must_use]
    pub fn new(args: ProvisionerArgs) -> Self {
        let (event_tx, _) = broadcast::channel(args.event_channel_capacity.max(1));
        Self {
            resolver: HostResolver::new(args.bindings, args.inventory.clone()),
            config: args.config,
            registry: args.registry,
            inventory: args.inventory,
            credentials: args.credentials,
            executors: args.executors,
            connected: HashMap::new(),
            store: args.store,
            event_tx,
        }
    }

    /// Receive progress events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> &EnvironmentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Create (or adopt) a compute resource and record `Created`
    ///
    /// An existing resource with the same name is adopted instead of
    /// creating a second one. Creation is never retried.
    ///
    /// # Errors
    /// Returns `ProvisionError::AllocationFailure` if the provider rejects the
    /// request or the resource is not ready in time
    #[instrument(skip(self, spec), fields(host = %spec.name))]
    pub async fn allocate(
        &mut self,
        spec: &ResourceSpec,
        dry_run: bool,
    ) -> Result<PhaseReport, ProvisionError> {
        self.phase_started(&spec.name, None, Phase::Created);
        let result = self.run_allocate(spec, dry_run).await;
        self.phase_finished(&spec.name, None, Phase::Created, &result);
        result
    }

    async fn run_allocate(
        &mut self,
        spec: &ResourceSpec,
        dry_run: bool,
    ) -> Result<PhaseReport, ProvisionError> {
        let mut report = PhaseReport::new(Phase::Created, &spec.name);
        report.dry_run = dry_run;

        let addresses = if let Some(existing) = self.inventory.find_by_name(&spec.name).await? {
            warn!(host = %spec.name, id = %existing.id, "resource already exists, adopting it");
            report
                .warnings
                .push(format!("adopted existing resource {}", existing.id));
            existing.addresses
        } else if dry_run {
            report.warnings.push(format!(
                "dry run: would create {} (size {}, region {}, image {})",
                spec.name, spec.size, spec.region, spec.image
            ));
            return Ok(report);
        } else {
            self.create_resource(spec).await?
        };

        report.address = addresses.public;
        if dry_run {
            return Ok(report);
        }

        info!(
            host = %spec.name,
            public = ?addresses.public,
            private = ?addresses.private,
            floating = ?addresses.floating,
            "resource addresses"
        );
        self.record(&spec.name, None, Phase::Created)?;
        Ok(report)
    }

    async fn create_resource(&self, spec: &ResourceSpec) -> Result<Addresses, ProvisionError> {
        let allocation = |e: provision_inventory::InventoryError| {
            ProvisionError::AllocationFailure(e.to_string())
        };

        let id = self.inventory.create(spec).await.map_err(allocation)?;
        info!(host = %spec.name, id = %id, "resource created, waiting until ready");

        let ready = self
            .inventory
            .wait_until_ready(&id, self.config.timeouts.allocate())
            .await
            .map_err(allocation)?;

        // Reserved addresses can lag the resource itself
        let refreshed = self.inventory.refresh().await.map_err(allocation)?;
        Ok(refreshed
            .into_iter()
            .find(|r| r.id == id)
            .map_or(ready.addresses, |r| r.addresses))
    }

    /// Run the bootstrap sequence and record `Bootstrapped`
    ///
    /// Safe to repeat on an already-bootstrapped host.
    ///
    /// # Errors
    /// Returns the typed error of the first aborting step
    #[instrument(skip(self))]
    pub async fn bootstrap(&mut self, host: &str) -> Result<PhaseReport, ProvisionError> {
        self.phase_started(host, None, Phase::Bootstrapped);
        let result = self.run_bootstrap(host).await;
        self.phase_finished(host, None, Phase::Bootstrapped, &result);
        result
    }

    async fn run_bootstrap(&mut self, host: &str) -> Result<PhaseReport, ProvisionError> {
        let ctx = self.connect(host).await?;

        let sequencer = BootstrapSequencer::new(&self.config, self.registry.iter());
        let steps = sequencer.steps(self.config.timeouts.connect());
        let sequence = self.run_steps(&ctx, &steps).await;
        if let Some(err) = sequence.error(host) {
            return Err(err);
        }
        let users = UserSummary::from_report(&sequence, sequencer.environments());

        for failure in &users.failed {
            warn!(host, env = %failure.env, reason = %failure.reason, "user creation failed");
        }
        info!(host, created = ?users.created, "bootstrap complete");

        let mut report = PhaseReport::new(Phase::Bootstrapped, host).with_sequence(&sequence);
        report.address = Some(ctx.resolved.address);
        report.users_created = users.created;
        self.record(host, None, Phase::Bootstrapped)?;
        Ok(report)
    }

    /// Clone or fast-forward each environment's checkout
    ///
    /// Environments are independent: every one is attempted and failures are
    /// collected.
    ///
    /// # Errors
    /// Returns `ProvisionError::PreconditionFailed` if the host was never
    /// bootstrapped, or `ProvisionError::EnvironmentsFailed` listing the
    /// environments whose checkout failed
    #[instrument(skip(self))]
    pub async fn checkout(
        &mut self,
        host: &str,
        env: Option<&str>,
    ) -> Result<PhaseReport, ProvisionError> {
        self.phase_started(host, env, Phase::SourceChecked);
        let result = self.run_checkout(host, env).await;
        self.phase_finished(host, env, Phase::SourceChecked, &result);
        result
    }

    async fn run_checkout(
        &mut self,
        host: &str,
        env: Option<&str>,
    ) -> Result<PhaseReport, ProvisionError> {
        let environments = self.registry.select(env)?;
        if self.config.source.repository.trim().is_empty() {
            return Err(ProvisionError::Config(
                "source.repository is not set".to_string(),
            ));
        }
        self.require(host, None, Phase::SourceChecked)?;

        let ctx = self.connect(host).await?;
        let mut report = PhaseReport::new(Phase::SourceChecked, host);
        report.address = Some(ctx.resolved.address);
        let mut failures = Vec::new();

        for environment in &environments {
            let step = Step::command(
                format!("checkout {} ({})", environment.branch, environment.name),
                self.checkout_command(environment),
            )
            .as_user(&environment.user);

            let sequence = self.run_steps(&ctx, std::slice::from_ref(&step)).await;
            match sequence.error(host) {
                None => {
                    self.record(host, Some(&environment.name), Phase::SourceChecked)?;
                    report.envs.push(environment.name.clone());
                }
                Some(err) => {
                    warn!(host, env = %environment.name, error = %err, "checkout failed");
                    failures.push(EnvFailure {
                        env: environment.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ProvisionError::EnvironmentsFailed {
                phase: Phase::SourceChecked,
                failures,
            })
        }
    }

    fn checkout_command(&self, environment: &Environment) -> String {
        let root = environment.source_root(&self.config.source);
        let parent = root
            .rsplit_once('/')
            .map_or(environment.home(), |(p, _)| p.to_string());
        let root = shell_quote(&root);
        let branch = shell_quote(&environment.branch);
        let repository = shell_quote(&self.config.source.repository);
        let parent = shell_quote(&parent);

        format!(
            "if [ -d {root}/.git ]; then \
               cd {root} && git fetch --prune origin \
               && {{ git checkout {branch} 2>/dev/null || git checkout -b {branch} --track origin/{branch}; }} \
               && git merge --ff-only origin/{branch}; \
             else \
               mkdir -p {parent} && git clone --branch {branch} {repository} {root}; \
             fi"
        )
    }

    /// Mirror runtime configuration for `env` to the environment user
    ///
    /// With no components requested, every component present in the local
    /// store for `env` is mirrored. Secret patterns are always excluded.
    ///
    /// # Errors
    /// Returns `ProvisionError::PreconditionFailed` before any transfer if
    /// the checkout for `(host, env)` never succeeded or there is nothing to
    /// sync, and `ProvisionError::TransferFailure` for a failed mirror
    #[instrument(skip(self))]
    pub async fn sync(
        &mut self,
        host: &str,
        env: &str,
        components: &[String],
    ) -> Result<PhaseReport, ProvisionError> {
        self.phase_started(host, Some(env), Phase::Synced);
        let result = self.run_sync(host, env, components).await;
        self.phase_finished(host, Some(env), Phase::Synced, &result);
        result
    }

    async fn run_sync(
        &mut self,
        host: &str,
        env: &str,
        components: &[String],
    ) -> Result<PhaseReport, ProvisionError> {
        let environment = self.registry.get(env)?.clone();
        self.require(host, Some(env), Phase::Synced)?;

        let steps = self.sync_steps(&environment, components)?;
        let ctx = self.connect(host).await?;
        let sequence = self.run_steps(&ctx, &steps).await;
        if let Some(err) = sequence.error(host) {
            return Err(err);
        }

        let mut report = PhaseReport::new(Phase::Synced, host).with_sequence(&sequence);
        report.address = Some(ctx.resolved.address);
        report.envs.push(environment.name.clone());
        self.record(host, Some(env), Phase::Synced)?;
        Ok(report)
    }

    /// One mirroring transfer step per component
    ///
    /// # Errors
    /// Returns `ProvisionError::PreconditionFailed` if a component has no
    /// local tree or none exist
    pub fn sync_steps(
        &self,
        environment: &Environment,
        components: &[String],
    ) -> Result<Vec<Step>, ProvisionError> {
        let local_root = self.config.sync.local_store.join(&environment.name);
        let components = if components.is_empty() {
            list_components(&local_root)?
        } else {
            components.to_vec()
        };
        if components.is_empty() {
            return Err(ProvisionError::PreconditionFailed(format!(
                "no components to sync under {}",
                local_root.display()
            )));
        }

        let runtime_root = environment.runtime_root(&self.config.source);
        components
            .into_iter()
            .map(|component| {
                let local = local_root.join(&component);
                if !local.is_dir() {
                    return Err(ProvisionError::PreconditionFailed(format!(
                        "component {component} has no local tree at {}",
                        local.display()
                    )));
                }
                let request = TransferRequest::new(local, format!("{runtime_root}/{component}"))
                    .mirrored()
                    .excluding(self.config.sync.secret_patterns.iter().cloned());
                Ok(
                    Step::transfer(format!("sync {component}"), component, request)
                        .as_user(&environment.user),
                )
            })
            .collect()
    }

    /// Install the runtime and dependencies, start the supervisor, list processes
    ///
    /// # Errors
    /// Returns `ProvisionError::PreconditionFailed` if `(host, env)` was never
    /// synced, or the typed error of the first aborting step
    #[instrument(skip(self))]
    pub async fn activate(&mut self, host: &str, env: &str) -> Result<PhaseReport, ProvisionError> {
        self.phase_started(host, Some(env), Phase::Activated);
        let result = self.run_activate(host, env).await;
        self.phase_finished(host, Some(env), Phase::Activated, &result);
        result
    }

    async fn run_activate(&mut self, host: &str, env: &str) -> Result<PhaseReport, ProvisionError> {
        let environment = self.registry.get(env)?.clone();
        self.require(host, Some(env), Phase::Activated)?;

        let ctx = self.connect(host).await?;
        let steps = self.activate_steps(&environment);
        let sequence = self.run_steps(&ctx, &steps).await;
        if let Some(err) = sequence.error(host) {
            return Err(err);
        }

        if let Some(listing) = sequence.outcome("list processes") {
            debug!(host, env, processes = %listing.output.trim(), "supervisor listing");
        }

        let mut report = PhaseReport::new(Phase::Activated, host).with_sequence(&sequence);
        report.address = Some(ctx.resolved.address);
        report.envs.push(environment.name.clone());
        self.record(host, Some(env), Phase::Activated)?;
        Ok(report)
    }

    fn activate_steps(&self, environment: &Environment) -> Vec<Step> {
        let runtime = &self.config.runtime;
        let node = shell_quote(&runtime.node_version);
        let supervisor = shell_quote(&runtime.supervisor);
        let source_root = shell_quote(&environment.source_root(&self.config.source));
        let nvm = r#". "$HOME/.nvm/nvm.sh""#;

        vec![
            Step::command(
                format!("runtime node {}", runtime.node_version),
                format!(
                    "{{ [ -s \"$HOME/.nvm/nvm.sh\" ] || PROFILE=/dev/null bash {installer}; }} \
                     && {nvm} && nvm install {node} && nvm alias default {node}",
                    installer = shell_quote(NVM_INSTALLER),
                ),
            )
            .as_user(&environment.user),
            Step::command(
                "install dependencies",
                format!(
                    "{nvm} && cd {source_root} \
                     && if [ -f package-lock.json ]; then npm ci; else npm install; fi"
                ),
            )
            .as_user(&environment.user),
            Step::command(
                format!("supervisor {}", runtime.supervisor),
                format!(
                    "{nvm} && {{ command -v {supervisor} >/dev/null || npm install -g {supervisor}; }} \
                     && {supervisor} ping"
                ),
            )
            .as_user(&environment.user),
            // An empty listing is valid for a fresh environment
            Step::command("list processes", format!("{nvm} && {supervisor} list"))
                .as_user(&environment.user)
                .continue_on_failure(),
        ]
    }

    /// Allocate → bootstrap → checkout → sync → activate
    ///
    /// Every phase runs even when a later one is already recorded. With no
    /// environment named, sync and activate run for every environment and
    /// failures are collected before stopping.
    ///
    /// # Errors
    /// Returns `ProvisionError::Aborted` naming the failed phase and the
    /// command that resumes from it
    #[instrument(skip(self, spec), fields(host = %spec.name))]
    pub async fn full(
        &mut self,
        spec: &ResourceSpec,
        env: Option<&str>,
    ) -> Result<Vec<PhaseReport>, ProvisionError> {
        let host = spec.name.clone();
        let environments = self.registry.select(env)?;
        let mut reports = Vec::new();

        reports.push(
            self.allocate(spec, false)
                .await
                .map_err(|e| aborted(Phase::Created, &host, &[], e))?,
        );
        reports.push(
            self.bootstrap(&host)
                .await
                .map_err(|e| aborted(Phase::Bootstrapped, &host, &[], e))?,
        );
        reports.push(
            self.checkout(&host, env)
                .await
                .map_err(|e| aborted(Phase::SourceChecked, &host, &failed_envs(&e, env), e))?,
        );

        for phase in [Phase::Synced, Phase::Activated] {
            let mut failures = Vec::new();
            let mut last_error = None;
            for environment in &environments {
                let result = match phase {
                    Phase::Synced => self.sync(&host, &environment.name, &[]).await,
                    _ => self.activate(&host, &environment.name).await,
                };
                match result {
                    Ok(report) => reports.push(report),
                    Err(err) => {
                        failures.push(EnvFailure {
                            env: environment.name.clone(),
                            reason: err.to_string(),
                        });
                        last_error = Some(err);
                    }
                }
            }

            let failed: Vec<String> = failures.iter().map(|f| f.env.clone()).collect();
            let err = match (failures.len(), last_error) {
                (0, _) | (_, None) => continue,
                (1, Some(err)) => err,
                _ => ProvisionError::EnvironmentsFailed { phase, failures },
            };
            let mut err = aborted(phase, &host, &failed, err);
            // Environments that did sync still need activating
            if phase == Phase::Synced
                && let ProvisionError::Aborted { resume, .. } = &mut err
            {
                for environment in environments.iter().filter(|e| !failed.contains(&e.name)) {
                    let activate = Phase::Activated.resume_command(&host, Some(&environment.name));
                    resume.push_str(" && ");
                    resume.push_str(&activate);
                }
            }
            return Err(err);
        }

        info!(host = %host, phases = reports.len(), "full provisioning complete");
        Ok(reports)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Phase records, optionally only those of one host
    #[must_use]
    pub fn status(&self, host: Option<&str>) -> Vec<(PhaseKey, PhaseRecord)> {
        self.store
            .records()
            .into_iter()
            .filter(|(key, _)| host.is_none_or(|h| key.host == h))
            .collect()
    }

    /// Forget records: one `host:env` key, or a host and all its environments
    ///
    /// # Errors
    /// Returns `ProvisionError::Store` if the reset cannot be persisted
    #[instrument(skip(self))]
    pub fn reset(&mut self, host: &str, env: Option<&str>) -> Result<usize, ProvisionError> {
        let keys: Vec<PhaseKey> = match env {
            Some(env) => vec![PhaseKey::env(host, env)],
            None => self
                .status(Some(host))
                .into_iter()
                .map(|(key, _)| key)
                .collect(),
        };

        let removed = keys.iter().filter(|key| self.store.reset(key)).count();
        self.store.flush()?;
        info!(host, removed, "phase records reset");
        Ok(removed)
    }

    /// Resolve an identifier without touching the host
    ///
    /// # Errors
    /// Returns `ProvisionError::HostNotFound` if no stage matches
    pub async fn resolve(&self, identifier: &str) -> Result<ResolvedHost, ProvisionError> {
        self.resolver.resolve(identifier).await
    }

    /// Close every executor opened this session
    pub async fn disconnect(&mut self) {
        for (host, executor) in self.connected.drain() {
            match executor.close().await {
                Ok(()) => debug!(host = %host, executor = executor.executor_type(), "closed"),
                Err(e) => warn!(host = %host, error = %e, "closing executor failed"),
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fail unless the predecessor of `phase` is recorded for the key
    fn require(&self, host: &str, env: Option<&str>, phase: Phase) -> Result<(), ProvisionError> {
        let Some(needed) = phase.predecessor() else {
            return Ok(());
        };
        let key = PhaseKey::for_phase(host, env, needed);
        match self.store.get(&key) {
            Some(record) if record.phase >= needed => Ok(()),
            current => Err(ProvisionError::PreconditionFailed(format!(
                "{phase} requires {key} to be {needed} (currently {}); run `{}` first",
                current.map_or_else(|| "unrecorded".to_string(), |r| r.phase.to_string()),
                needed.resume_command(host, env),
            ))),
        }
    }

    /// Record `phase`, keeping any later phase already recorded for the key
    fn record(
        &mut self,
        host: &str,
        env: Option<&str>,
        phase: Phase,
    ) -> Result<PhaseRecord, ProvisionError> {
        let key = PhaseKey::for_phase(host, env, phase);
        if let Some(existing) = self.store.get(&key)
            && existing.phase > phase
        {
            debug!(key = %key, recorded = %existing.phase, ran = %phase, "keeping later phase");
            return Ok(existing);
        }

        let record = self.store.set(&key, phase);
        self.store.flush()?;
        info!(key = %key, phase = %phase, "phase recorded");
        Ok(record)
    }

    async fn connect(&mut self, host: &str) -> Result<HostContext, ProvisionError> {
        let resolved = self.resolver.resolve(host).await?;
        info!(host, address = %resolved.address, via = %resolved.via, "resolved host");

        let executor = match self.connected.get(host) {
            Some(executor) => executor.clone(),
            None => {
                let credential = self
                    .credentials
                    .bootstrap_credential(host)
                    .map_err(|e| ProvisionError::Credential(e.to_string()))?;
                let executor = self.executors.create_executor(&resolved, &credential).await?;
                self.connected.insert(host.to_string(), executor.clone());
                executor
            }
        };

        let privileged = Target::new(
            resolved.address.to_string(),
            &self.config.ssh.privileged_user,
        )
        .with_port(self.config.ssh.port);

        Ok(HostContext {
            resolved,
            executor,
            privileged,
        })
    }

    async fn run_steps(&self, ctx: &HostContext, steps: &[Step]) -> SequenceReport {
        StepRunner::new(ctx.executor.as_ref(), &ctx.privileged, &self.event_tx)
            .with_timeouts(
                self.config.timeouts.command(),
                self.config.timeouts.transfer(),
            )
            .run(steps)
            .await
    }

    fn phase_started(&self, host: &str, env: Option<&str>, phase: Phase) {
        info!(host, env, phase = %phase, "phase started");
        let _ = self.event_tx.send(ProvisionEvent::PhaseStarted {
            host: host.to_string(),
            env: env.map(String::from),
            phase,
        });
    }

    fn phase_finished(
        &self,
        host: &str,
        env: Option<&str>,
        phase: Phase,
        result: &Result<PhaseReport, ProvisionError>,
    ) {
        match result {
            Ok(report) => info!(
                host,
                env,
                phase = %phase,
                warnings = report.warnings.len(),
                "phase finished"
            ),
            Err(err) => warn!(host, env, phase = %phase, error = %err, "phase failed"),
        }
        let _ = self.event_tx.send(ProvisionEvent::PhaseFinished {
            host: host.to_string(),
            env: env.map(String::from),
            phase,
            success: result.is_ok(),
            warnings: result.as_ref().map_or(0, |r| r.warnings.len()),
        });
    }
}

fn list_components(root: &Path) -> Result<Vec<String>, ProvisionError> {
    let entries = std::fs::read_dir(root).map_err(|e| {
        ProvisionError::PreconditionFailed(format!(
            "cannot read local store {}: {e}",
            root.display()
        ))
    })?;

    let mut components: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    components.sort();
    Ok(components)
}

/// Environments named in a per-environment failure, else the one requested
fn failed_envs(err: &ProvisionError, requested: Option<&str>) -> Vec<String> {
    match err {
        ProvisionError::EnvironmentsFailed { failures, .. } if failures.len() == 1 => {
            vec![failures[0].env.clone()]
        }
        _ => requested.map(String::from).into_iter().collect(),
    }
}

fn aborted(phase: Phase, host: &str, envs: &[String], source: ProvisionError) -> ProvisionError {
    let resume = if envs.is_empty() {
        phase.resume_command(host, None)
    } else {
        envs.iter()
            .map(|env| phase.resume_command(host, Some(env)))
            .collect::<Vec<_>>()
            .join(" && ")
    };
    ProvisionError::Aborted {
        phase,
        resume,
        source: Box::new(source),
    }
}
