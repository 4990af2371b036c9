//! snapsync - btrfs snapshot management with peer reconciliation
//!
//! Takes read-only, timestamp-named snapshots of a btrfs volume and compares
//! snapshot inventories with a peer node to find what each side lacks.

mod display;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use snapsync_config::{Config, ConfigBuilder, ConfigLoader, LoggingConfig, NodeRole};
use snapsync_driver::{BtrfsDriver, DriverOptions};
use snapsync_network::{ClientConfig, PeerClient, PeerServer, ServerConfig};
use snapsync_sync::SyncEngine;
use snapsync_types::{VolumeConfig, VolumeDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// snapsync - btrfs snapshot management with peer reconciliation
#[derive(Parser)]
#[command(
    name = "snapsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "btrfs snapshot management with peer reconciliation",
    long_about = "snapsync takes read-only, timestamp-named snapshots of a btrfs volume\n\
                  and reconciles snapshot inventories between a client and a server node."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Volume to manage
    #[arg(long, global = true)]
    volume: Option<PathBuf>,

    /// Snapshot directory, relative to the volume
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer inventory exchanges from clients
    Serve {
        /// Listen address
        #[arg(long)]
        bind: Option<String>,
    },
    /// Reconcile snapshot inventories with a server
    Sync {
        /// Server address as HOST:PORT
        #[arg(long)]
        peer: Option<String>,
        /// Announce every snapshot the peer lacks
        #[arg(long)]
        announce: bool,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Take one read-only snapshot
    Snapshot {
        /// Subvolume to snapshot, defaults to the volume itself
        source: Option<PathBuf>,
    },
    /// List snapshots in the snapshot directory
    List {
        /// Print the inventory as JSON
        #[arg(long)]
        json: bool,
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

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load_default()?,
    };
    apply_overrides(&mut config, &cli)?;
    ConfigBuilder::validate(&config)?;

    init_logging(&config.logging, cli.debug, cli.quiet, cli.verbose)?;

    info!("snapsync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { .. } => serve_command(&config, cli.quiet).await?,
        Commands::Sync { announce, json, .. } => {
            sync_command(&config, announce, json, cli.quiet).await?;
        }
        Commands::Snapshot { source } => snapshot_command(&config, source, cli.quiet).await?,
        Commands::List { json } => list_command(&config, json, cli.quiet).await?,
        Commands::Config { default } => config_command(&config, default)?,
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(volume) = &cli.volume {
        config.volume.path.clone_from(volume);
    }
    if let Some(snapshot_dir) = &cli.snapshot_dir {
        config.volume.snapshot_dir.clone_from(snapshot_dir);
    }

    match &cli.command {
        Commands::Serve { bind } => {
            config.node.role = NodeRole::Server;
            if let Some(bind) = bind {
                config.node.bind_addr.clone_from(bind);
            }
        }
        Commands::Sync { peer, .. } => {
            config.node.role = NodeRole::Client;
            if let Some(peer) = peer {
                let (host, port) = parse_peer(peer, config.node.peer_port)?;
                config.node.peer_host = host;
                config.node.peer_port = port;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Split `HOST[:PORT]`, keeping `default_port` when no port is given
fn parse_peer(peer: &str, default_port: u16) -> Result<(String, u16)> {
    match peer.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .with_context(|| format!("invalid port in peer address '{}'", peer))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(anyhow!("missing host in peer address '{}'", peer)),
        None => Ok((peer.to_string(), default_port)),
    }
}

fn log_level<'a>(configured: &'a str, debug: bool, quiet: bool, verbose: bool) -> &'a str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        configured
    }
}

fn init_logging(logging: &LoggingConfig, debug: bool, quiet: bool, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = log_level(&logging.level, debug, quiet, verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Prepare the configured volume; failure is fatal for every command
async fn open_volume(config: &Config) -> Result<(Arc<BtrfsDriver>, VolumeConfig)> {
    let volume = config.volume_config()?;
    let timeouts = config.timeout_config();
    let driver = BtrfsDriver::system().with_options(DriverOptions {
        command_timeout: timeouts.command_timeout,
        auto_create_container: config.volume.auto_create_container,
        ..DriverOptions::default()
    });

    driver.prepare(&volume).await.with_context(|| {
        format!(
            "{} is not usable as a btrfs volume",
            volume.volume_path().display()
        )
    })?;

    Ok((Arc::new(driver), volume))
}

async fn take_snapshot(
    driver: &BtrfsDriver,
    volume: &VolumeConfig,
    source: &Path,
    quiet: bool,
) -> Result<()> {
    let pb = display::spinner(quiet, format!("Snapshotting {}", source.display()));
    let outcome = driver.snapshot(volume, source).await;
    display::finish(pb);

    let outcome = outcome?;
    if !quiet {
        display::print_outcome(&outcome);
    }
    Ok(())
}

async fn serve_command(config: &Config, quiet: bool) -> Result<()> {
    let (driver, volume) = open_volume(config).await?;
    if config.volume.snapshot_on_start {
        take_snapshot(&driver, &volume, volume.volume_path(), quiet).await?;
    }

    let namer = driver.namer().clone();
    let engine = Arc::new(SyncEngine::new(driver, volume));
    let server_config = ServerConfig {
        bind_addr: config.bind_addr()?,
        ..ServerConfig::default()
    };

    let mut server = PeerServer::new(server_config, Arc::clone(&engine), namer);
    let local_addr = server.bind().await?;
    if !quiet {
        println!(
            "{} Serving {} on {}",
            style("⇄").blue().bold(),
            style(engine.config().snapshot_root().display()).cyan(),
            style(local_addr).cyan()
        );
    }

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown().await;
        }
    });

    server.start().await?;
    Ok(())
}

async fn sync_command(config: &Config, announce: bool, json: bool, quiet: bool) -> Result<()> {
    let (driver, volume) = open_volume(config).await?;
    if config.volume.snapshot_on_start {
        take_snapshot(&driver, &volume, volume.volume_path(), quiet || json).await?;
    }

    let timeouts = config.timeout_config();
    let client = PeerClient::with_config(
        config.peer_address(),
        ClientConfig {
            connect_timeout: timeouts.connect_timeout,
            request_timeout: timeouts.request_timeout,
            ..ClientConfig::default()
        },
    );
    let engine = SyncEngine::new(driver, volume);

    let pb = display::spinner(quiet || json, format!("Reconciling with {}", client.peer()));
    let plan = engine.plan(&client).await;
    display::finish(pb);
    let plan = plan?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if !quiet {
        display::print_plan(&plan);
    }

    if announce {
        for name in &plan.to_send {
            // No byte stream is offered yet, so no port either
            let ack = client.announce_snapshot(name, 0).await?;
            if !quiet && !json {
                display::print_ack(name, &ack);
            }
        }
    }

    Ok(())
}

async fn snapshot_command(config: &Config, source: Option<PathBuf>, quiet: bool) -> Result<()> {
    let (driver, volume) = open_volume(config).await?;
    let source = source.unwrap_or_else(|| volume.volume_path().to_path_buf());
    take_snapshot(&driver, &volume, &source, quiet).await
}

async fn list_command(config: &Config, json: bool, quiet: bool) -> Result<()> {
    let (driver, volume) = open_volume(config).await?;
    let inventory = driver.list_snapshots(&volume).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
    } else if !quiet {
        println!(
            "{} Snapshots in {}",
            style("⚙").blue().bold(),
            style(volume.snapshot_root().display()).cyan()
        );
        display::print_inventory(&inventory);
    }
    Ok(())
}

fn config_command(config: &Config, default: bool) -> Result<()> {
    if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        print!("{}", ConfigLoader::render(&Config::default(), None)?);
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        match ConfigLoader::config_exists() {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# no configuration file found, using defaults"),
        }
        print!("{}", ConfigLoader::render(config, None)?);
    }
    Ok(())
}
