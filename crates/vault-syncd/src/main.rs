//! vault-syncd: headless daemon keeping one vault in sync through a
//! folder-backed document store.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vault_sync::EventBus;
use vault_syncd::{build_syncer, log_events, DaemonConfig, FileWatcher, FolderStore};

#[derive(Parser, Debug)]
#[command(name = "vault-syncd")]
#[command(about = "Vault sync daemon")]
struct Args {
    /// YAML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the vault directory (overrides the settings file)
    #[arg(short, long)]
    vault: Option<PathBuf>,

    /// Root of the shared document store (overrides the settings file)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Tick interval in milliseconds (overrides the settings file)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Create the store layout if it does not exist
    #[arg(long)]
    create_store: bool,

    /// Don't watch the vault; sync on the interval only
    #[arg(long)]
    no_watch: bool,

    /// Print sync events as JSON lines on stdout
    #[arg(long)]
    events: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,vault_sync=debug,vault_syncd=debug"
    } else {
        "info,vault_sync=info,vault_syncd=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if args.vault.is_some() {
        config.vault_path = args.vault.clone();
    }
    if args.store.is_some() {
        config.store_path = args.store.clone();
    }
    if let Some(interval) = args.interval_ms {
        config.syncer.tick_interval_ms = interval;
    }
    config.finalize()?;

    info!("Starting vault-syncd");
    info!("Vault path: {:?}", config.vault_path()?);
    info!("Store path: {:?}", config.store_path()?);

    if args.create_store {
        FolderStore::create(config.store_path()?.to_path_buf())
            .await
            .context("creating store")?;
    }

    let bus = Arc::new(EventBus::new());
    let _events = log_events(&bus, args.events);

    let mut syncer = build_syncer(&config, bus.clone())?;
    info!(
        "Syncing vault '{}' as device {}",
        syncer.config().vault_name,
        syncer.device_id()
    );

    syncer.init().await.context("initializing syncer")?;
    syncer.start()?;

    let handle = syncer.handle();
    let _watch_task = if args.no_watch {
        None
    } else {
        match FileWatcher::new(config.vault_path()?.to_path_buf(), config.syncer.filter.clone()) {
            Ok(watcher) => {
                info!("File watcher started");
                Some(watcher.trigger_ticks(handle.clone()))
            }
            Err(e) => {
                warn!("File watcher unavailable, syncing on the interval only: {}", e);
                None
            }
        }
    };

    // Handle graceful shutdown
    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        shutdown.teardown();
    });

    info!("Daemon running. Press Ctrl+C to stop.");
    while syncer.next_tick().await {}

    info!("Shutting down");
    Ok(())
}
