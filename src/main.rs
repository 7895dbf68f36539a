//! memtier - Tiered Memory Controller
//!
//! Runs the memory controller as a long-lived service and provides tools for
//! inspecting its snapshot archives.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memtier::{
    config::MemTierConfig,
    memory::{snapshot, MemoryController, SnapshotArchive, SnapshotMode},
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memtier")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Tiered memory controller for autonomous agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MEMTIER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller and run until Ctrl+C
    Run {
        /// Write a manual snapshot before shutting down
        #[arg(long)]
        snapshot_on_exit: bool,
    },

    /// List snapshot archives, newest first
    Snapshots,

    /// Show the contents of a snapshot archive
    Inspect {
        /// Archive path
        path: PathBuf,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let json = cli.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("memtier={}", log_level).into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => MemTierConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let mut config = MemTierConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };

    match cli.command {
        Commands::Run { snapshot_on_exit } => run(config, snapshot_on_exit).await?,
        Commands::Snapshots => list_snapshots(&config).await?,
        Commands::Inspect { path } => inspect(&path).await?,
        Commands::Config { default } => show_config(if default { None } else { Some(&config) })?,
    }

    Ok(())
}

async fn run(config: MemTierConfig, snapshot_on_exit: bool) -> Result<()> {
    tracing::info!("Starting memtier");

    let controller = MemoryController::from_config(config)?;
    controller.start().await?;

    let stats = controller.stats().await?;
    for (partition, p) in &stats.partitions {
        tracing::info!(partition = %partition, count = p.count, max_items = p.max_items, "Partition ready");
    }
    tracing::info!("memtier is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    if snapshot_on_exit {
        match controller.create_snapshot(SnapshotMode::Manual).await {
            Ok(info) => tracing::info!(path = %info.path.display(), "Exit snapshot written"),
            Err(e) => tracing::warn!(error = %e, "Exit snapshot failed"),
        }
    }
    controller.stop().await?;

    Ok(())
}

async fn list_snapshots(config: &MemTierConfig) -> Result<()> {
    let snapshots = snapshot::list_snapshots(&config.snapshot.dir).await?;
    if snapshots.is_empty() {
        println!("No snapshots in {}", config.snapshot.dir.display());
        return Ok(());
    }

    println!("{:<26} {:<7} {:>10}  PATH", "CREATED", "MODE", "BYTES");
    for s in snapshots {
        println!(
            "{:<26} {:<7} {:>10}  {}",
            s.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            s.mode,
            s.size_bytes,
            s.path.display()
        );
    }
    Ok(())
}

async fn inspect(path: &Path) -> Result<()> {
    let archive = SnapshotArchive::read_from(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;

    println!("Snapshot: {}", path.display());
    println!("  version:  {}", archive.version);
    println!("  created:  {}", archive.created_at.to_rfc3339());
    println!(
        "  mode:     {}",
        match archive.mode {
            SnapshotMode::Auto => "automatic",
            SnapshotMode::Manual => "manual",
        }
    );
    println!("  checksum: {}", archive.checksum);
    println!();
    for section in &archive.partitions {
        let summaries = section.items.iter().filter(|i| i.is_summary).count();
        println!(
            "  {:<15} {:>6} items ({} summaries)  namespace={}",
            section.partition.as_str(),
            section.items.len(),
            summaries,
            section.namespace
        );
    }
    Ok(())
}

fn show_config(config: Option<&MemTierConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
