//! provision CLI
//!
//! Drives hosts through allocate, bootstrap, checkout, sync and activate,
//! resuming from any phase after a partial failure.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::Result;
use kameo::actor::{ActorRef, Spawn};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use provision_core::{
    Activate, Allocate, Bootstrap, Checkout, EventStream, FileStateStore, Full, GetStatus,
    ListEnvironments, PhaseReport, ProvisionActor, ProvisionError, ProvisionerArgs, Reset, Resolve,
    Subscribe, SyncComponents, reply,
};
use provision_exec::LocalExecutor;
use provision_inventory::{DoctlInventory, InventoryCache};

mod config;
mod factory;
mod output;

use config::Config;
use factory::DefaultExecutorFactory;

#[derive(Parser)]
#[command(name = "provision", version)]
#[command(about = "Provision hosts through resumable convergence phases", long_about = None)]
struct Cli {
    /// Configuration file (default: $PROVISION_CONFIG, ./provision.toml, user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `[allocate]` defaults
#[derive(Args, Debug, Default)]
struct Sizing {
    /// Size slug
    #[arg(long)]
    size: Option<String>,
    /// Region slug
    #[arg(long)]
    region: Option<String>,
    /// Image slug
    #[arg(long)]
    image: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Allocate (or adopt) a compute resource
    Create {
        name: String,
        #[command(flatten)]
        sizing: Sizing,
        /// Show the request without creating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Base packages, environment users and keys
    Bootstrap { host: String },
    /// Clone or fast-forward source checkouts
    Checkout { host: String, env: Option<String> },
    /// Mirror runtime configuration to an environment
    Sync {
        host: String,
        env: String,
        /// Components to mirror (default: all under the local store)
        components: Vec<String>,
    },
    /// Runtime, dependencies and process supervisor
    Activate { host: String, env: String },
    /// Every phase in order
    Full {
        name: String,
        env: Option<String>,
        #[command(flatten)]
        sizing: Sizing,
    },
    /// Recorded phases
    Status { host: Option<String> },
    /// Forget recorded phases for a host or one of its environments
    Reset { host: String, env: Option<String> },
    /// Show where an identifier resolves to
    Resolve { identifier: String },
    /// List configured environments
    Envs,
}

fn init_tracing(config_level: &str, verbose: u8) {
    let level = match verbose {
        0 => config_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn provisioner_args(config: &Config) -> Result<ProvisionerArgs> {
    let timeouts = &config.provisioner.timeouts;

    let mut doctl = DoctlInventory::new(Arc::new(LocalExecutor::new()))
        .with_timeouts(timeouts.command(), timeouts.allocate());
    if config.context != "default" {
        doctl = doctl.with_context(&config.context);
    }
    let inventory = InventoryCache::new(Arc::new(doctl), config.inventory.ttl())
        .with_poll_interval(config.inventory.poll_interval());

    let mut provisioner = config.provisioner.clone();
    provisioner.authorized_key = config.authorized_key()?;
    if provisioner.authorized_key.is_none() {
        warn!("no public key found; bootstrap will skip key deployment");
    }

    let store = FileStateStore::open(config.state_path())?;
    info!(path = %store.path().display(), "phase records");

    Ok(ProvisionerArgs {
        config: provisioner,
        registry: config.registry()?,
        // One snapshot; nothing reads the process environment after this
        bindings: config.bindings(std::env::vars())?,
        inventory: Arc::new(inventory),
        credentials: Arc::new(config.credentials()),
        executors: Arc::new(DefaultExecutorFactory::new(timeouts.connect())),
        store: Box::new(store),
        event_channel_capacity: 1024,
    })
}

/// Run `request` while printing the actor's progress events
async fn with_progress<T, F>(
    actor_ref: &ActorRef<ProvisionActor>,
    request: F,
) -> Result<T, ProvisionError>
where
    F: Future<Output = Result<T, ProvisionError>> + Send + 'static,
    T: Send + 'static,
{
    let EventStream(mut rx) = actor_ref
        .ask(Subscribe)
        .await
        .map_err(|e| ProvisionError::Actor(e.to_string()))?;
    let mut task = tokio::spawn(request);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => output::print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "progress events dropped"),
                Err(RecvError::Closed) => break,
            },
            joined = &mut task => {
                while let Ok(event) = rx.try_recv() {
                    output::print_event(&event);
                }
                return joined.map_err(|e| ProvisionError::Actor(e.to_string()))?;
            }
        }
    }

    task.await
        .map_err(|e| ProvisionError::Actor(e.to_string()))?
}

fn finish(result: Result<Vec<PhaseReport>, ProvisionError>) -> ExitCode {
    match result {
        Ok(reports) => {
            for line in reports.iter().flat_map(output::render_report) {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &Config, actor_ref: &ActorRef<ProvisionActor>) -> ExitCode {
    let actor = actor_ref.clone();
    let single = |r: Result<PhaseReport, ProvisionError>| r.map(|report| vec![report]);

    match command {
        Commands::Create {
            name,
            sizing,
            dry_run,
        } => {
            let spec = config.resource_spec(&name, sizing.size, sizing.region, sizing.image);
            let result = with_progress(actor_ref, async move {
                reply(actor.ask(Allocate { spec, dry_run }).await)
            })
            .await;
            finish(single(result))
        }
        Commands::Bootstrap { host } => {
            let result =
                with_progress(actor_ref, async move { reply(actor.ask(Bootstrap { host }).await) })
                    .await;
            finish(single(result))
        }
        Commands::Checkout { host, env } => {
            let result = with_progress(actor_ref, async move {
                reply(actor.ask(Checkout { host, env }).await)
            })
            .await;
            finish(single(result))
        }
        Commands::Sync {
            host,
            env,
            components,
        } => {
            let result = with_progress(actor_ref, async move {
                reply(
                    actor
                        .ask(SyncComponents {
                            host,
                            env,
                            components,
                        })
                        .await,
                )
            })
            .await;
            finish(single(result))
        }
        Commands::Activate { host, env } => {
            let result = with_progress(actor_ref, async move {
                reply(actor.ask(Activate { host, env }).await)
            })
            .await;
            finish(single(result))
        }
        Commands::Full { name, env, sizing } => {
            let spec = config.resource_spec(&name, sizing.size, sizing.region, sizing.image);
            let result =
                with_progress(actor_ref, async move { reply(actor.ask(Full { spec, env }).await) })
                    .await;
            finish(result)
        }
        Commands::Status { host } => match actor.ask(GetStatus { host }).await {
            Ok(status) => {
                for line in output::render_status(&status.records) {
                    println!("{line}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => finish(Err(ProvisionError::Actor(e.to_string()))),
        },
        Commands::Reset { host, env } => {
            match reply(actor.ask(Reset { host: host.clone(), env }).await) {
                Ok(removed) => {
                    println!("removed {removed} record(s) for {host}");
                    ExitCode::SUCCESS
                }
                Err(err) => finish(Err(err)),
            }
        }
        Commands::Resolve { identifier } => match reply(actor.ask(Resolve { identifier }).await) {
            Ok(host) => {
                println!("{}", output::render_resolved(&host));
                ExitCode::SUCCESS
            }
            Err(err) => finish(Err(err)),
        },
        Commands::Envs => match actor.ask(ListEnvironments).await {
            Ok(table) => {
                for line in output::render_environments(&table) {
                    println!("{line}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => finish(Err(ProvisionError::Actor(e.to_string()))),
        },
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let (config, source) = Config::load_default(cli.config.as_deref())?;
    init_tracing(&config.log_level, cli.verbose);
    match &source {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => warn!("no config file found, using defaults"),
    }

    let actor_ref = ProvisionActor::spawn(provisioner_args(&config)?);
    let code = run(cli.command, &config, &actor_ref).await;
    // on_stop closes SSH sessions
    actor_ref.stop_gracefully().await.ok();
    actor_ref.wait_for_shutdown().await;

    Ok(code)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_components_are_positional() {
        let cli = Cli::try_parse_from(["provision", "sync", "web-1", "dev", "api", "worker"])
            .unwrap();
        match cli.command {
            Commands::Sync {
                host,
                env,
                components,
            } => {
                assert_eq!(host, "web-1");
                assert_eq!(env, "dev");
                assert_eq!(components, vec!["api", "worker"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_create_dry_run_and_sizing() {
        let cli = Cli::try_parse_from([
            "provision",
            "-vv",
            "create",
            "web-2",
            "--size",
            "s-2vcpu-4gb",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Create { dry_run: true, sizing: Sizing { size: Some(_), region: None, .. }, .. }
        ));
    }

    #[test]
    fn test_full_env_is_optional() {
        let cli = Cli::try_parse_from(["provision", "full", "web-2"]).unwrap();
        assert!(matches!(cli.command, Commands::Full { env: None, .. }));
        assert!(Cli::try_parse_from(["provision", "activate", "web-2"]).is_err());
    }
}
