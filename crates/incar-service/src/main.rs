//! incard - in-car adjustment daemon

#![deny(clippy::unwrap_used)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use incar_actuation::shared_sink;
use incar_input::{DeviceAllowlist, InputHub, spawn_stdin};
use incar_profile_repository::{BindingStore, ProfileKey, ProfileRepositoryConfig};
use incar_service::{
    Engine, EngineConfig, EngineEvent, LoggingSink, SimulatedSimulator, SourceKind,
};
use incar_telemetry::{ControlDiscovery, SnapshotFileSource, TelemetrySource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "incard")]
#[command(about = "Drive in-car simulator adjustments from keys, buttons and voice")]
#[command(version)]
struct Cli {
    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file (defaults to the per-user location)
    #[arg(long, global = true, env = "INCAR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted
    Run {
        /// Use the built-in simulated car instead of the telemetry bridge
        #[arg(long)]
        simulate: bool,

        /// Telemetry bridge output file
        #[arg(long)]
        snapshot_file: Option<PathBuf>,

        /// Read input commands (`press F1`, `tap VOICE:abs up`) from stdin
        #[arg(long)]
        stdin_input: bool,
    },

    /// Stored profile commands
    #[command(subcommand)]
    Profiles(ProfileCommands),
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List stored profiles
    List,
    /// Print one stored profile as JSON
    Show {
        car: String,
        track: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    info!("Starting incard v{}", env!("CARGO_PKG_VERSION"));

    let (config, config_path) = EngineConfig::load(cli.config.as_deref()).await?;
    debug!(path = ?config_path, "Configuration loaded");

    let result = match cli.command {
        Commands::Run {
            simulate,
            snapshot_file,
            stdin_input,
        } => run(config, simulate, snapshot_file, stdin_input).await,
        Commands::Profiles(command) => profiles(&config, command).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "incard failed");
    }
    result
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("incar={level},incard={level},warn").into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn open_store(config: &EngineConfig) -> Result<Arc<BindingStore>> {
    let dir = config.profiles_dir()?;
    let store = BindingStore::new(ProfileRepositoryConfig::new(&dir))
        .await
        .with_context(|| format!("Failed to open profile store at {}", dir.display()))?;
    Ok(Arc::new(store))
}

async fn run(
    mut config: EngineConfig,
    simulate: bool,
    snapshot_file: Option<PathBuf>,
    stdin_input: bool,
) -> Result<()> {
    if simulate {
        config.telemetry.source = SourceKind::Simulated;
    }
    if let Some(path) = snapshot_file {
        config.telemetry.snapshot_path = Some(path);
    }

    let store = open_store(&config).await?;

    let (source, sink) = match config.telemetry.source {
        SourceKind::Simulated => {
            info!("Using the simulated car");
            let sim = SimulatedSimulator::gt3_demo();
            (Arc::new(sim.clone()) as Arc<dyn TelemetrySource>, shared_sink(sim))
        }
        SourceKind::SnapshotFile => {
            let path = config.snapshot_path()?;
            info!(path = ?path, "Reading telemetry snapshots");
            let source = SnapshotFileSource::new(path)
                .with_discovery(ControlDiscovery::new(config.telemetry.control_prefix.clone()));
            (Arc::new(source) as Arc<dyn TelemetrySource>, shared_sink(LoggingSink))
        }
    };

    let allowlist = DeviceAllowlist::new(&config.input.allowed_devices);
    if allowlist.is_restricted() {
        info!(devices = ?allowlist.devices(), "HID input limited to allowed devices");
    }
    let hub = InputHub::new(config.input.queue_capacity).with_allowlist(allowlist);
    let stdin_task = stdin_input.then(|| spawn_stdin(hub.sender("stdin")));
    let inputs = hub.into_receiver();

    let engine = Engine::new(config, store);
    let events = engine.subscribe();
    let handle = engine.start(source, sink, inputs)?;
    let logger = tokio::spawn(log_events(events));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted; shutting down");

    if let Some(task) = stdin_task {
        task.abort();
    }
    handle.shutdown().await?;
    logger.abort();
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match &event {
                EngineEvent::ValueChanged { .. } | EngineEvent::ComboProgress { .. } => {
                    debug!(kind = event.kind(), event = ?event, "engine event");
                }
                EngineEvent::ProfileCorrupt { .. }
                | EngineEvent::DegradedMode { .. }
                | EngineEvent::Warning { .. } => {
                    warn!(kind = event.kind(), event = ?event, "engine event");
                }
                _ => info!(kind = event.kind(), event = ?event, "engine event"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn profiles(config: &EngineConfig, command: ProfileCommands) -> Result<()> {
    let store = open_store(config).await?;
    match command {
        ProfileCommands::List => {
            let stored = store.list().await?;
            if stored.is_empty() {
                println!("No stored profiles in {}", store.profiles_dir().display());
            }
            for profile in stored {
                println!("{}\t{}\t{}", profile.key, profile.saved_at, profile.path.display());
            }
        }
        ProfileCommands::Show { car, track } => {
            let key = ProfileKey::new(&car, &track);
            match store.load(&key).await? {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => anyhow::bail!("No stored profile for {key}"),
            }
        }
    }
    Ok(())
}
