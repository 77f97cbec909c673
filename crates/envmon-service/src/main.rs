//! envmon - environmental monitor control loop.
//!
//! Run with: `cargo run -p envmon-service`

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use envmon_service::{Config, build_orchestrator, default_config_path};
use envmon_types::StorageMode;

/// envmon - sensor-to-sink environmental monitor.
#[derive(Parser, Debug)]
#[command(name = "envmon")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Upload endpoint (overrides config).
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    /// Storage root (overrides config).
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Storage mode: online, offline or hybrid (overrides config).
    #[arg(long, global = true)]
    mode: Option<StorageMode>,

    /// Sampling interval in milliseconds (overrides config).
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Disable automatic upload.
    #[arg(long, global = true)]
    no_upload: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor in the foreground (default behavior).
    Run,

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration and report every error.
    Check,

    /// Print the configuration file path.
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Config { ref action }) => handle_config_action(&args, action),
        Some(Command::Run) | None => run_monitor(args).await,
    }
}

fn config_path(args: &Args) -> PathBuf {
    args.config.clone().unwrap_or_else(default_config_path)
}

fn handle_config_action(args: &Args, action: &ConfigAction) -> anyhow::Result<()> {
    let path = config_path(args);
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Check => {
            Config::load_validated(&path)?;
            println!("{} is valid", path.display());
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(endpoint) = &args.endpoint {
        config.upload.endpoint = endpoint.clone();
    }
    if let Some(root) = &args.storage {
        config.storage.root = root.clone();
    }
    if let Some(mode) = args.mode {
        config.storage.mode = mode;
    }
    if let Some(interval) = args.interval_ms {
        config.sensor.sampling_interval_ms = interval;
    }
    if args.no_upload {
        config.upload.enabled = false;
    }
}

async fn run_monitor(args: Args) -> anyhow::Result<()> {
    let (mut config, load_error) = Config::load_or_default(args.config.as_deref());

    // Initialize logging
    let level = config.logging.level.to_ascii_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("envmon_service={level}").parse()?)
                .add_directive(format!("envmon_core={level}").parse()?)
                .add_directive(format!("envmon_store={level}").parse()?),
        )
        .init();

    if let Some(e) = load_error {
        warn!("Using default configuration: {}", e);
    }

    apply_overrides(&mut config, &args);
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid command line overrides: {e}");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = Arc::clone(&stop);
    let loop_interval = Duration::from_millis(config.device.loop_interval_ms);

    info!(
        "Starting envmon as {} (storage {} at {})",
        config.device.id,
        config.storage.mode,
        config.storage.root.display()
    );

    // The HTTP client blocks, so the whole loop lives on a blocking thread
    let mut control = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut orchestrator = build_orchestrator(&config)?;
        if let Err(e) = orchestrator.initialize() {
            orchestrator.shutdown();
            anyhow::bail!("Sensor initialization failed: {e}");
        }

        let mut last_health = orchestrator.health();
        while !loop_stop.load(Ordering::Relaxed) {
            let outcome = orchestrator.tick();
            if outcome.status_refreshed {
                let health = orchestrator.health();
                if health != last_health {
                    info!("Monitor is now {}", health);
                    last_health = health;
                }
            }
            std::thread::sleep(loop_interval);
        }

        orchestrator.shutdown();
        let routes = orchestrator.routes();
        info!(
            "Stopped: {} uploaded, {} stored, {} queued",
            routes.uploaded, routes.stored, routes.queued
        );
        Ok(())
    });

    tokio::select! {
        result = &mut control => return result?,
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!("Cannot listen for shutdown signal: {}", e),
            }
            stop.store(true, Ordering::Relaxed);
        }
    }

    control.await?
}
