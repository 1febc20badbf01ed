//! Binary entrypoint for the meshpanel CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `status` - load the persisted snapshot and summarise devices and node databases
//! - `prune` - load the snapshot (dropping orphan sessions) and write it back
//!
//! See the library crate docs for module-level details: `meshpanel::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::str::FromStr;

use meshpanel::config::Config;
use meshpanel::persistence::{load_registry, save_registry, StateStore};

#[derive(Parser)]
#[command(name = "meshpanel")]
#[command(about = "Device and node state tools for a Meshtastic control panel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Show persisted devices, node databases and sync state
    Status,
    /// Drop orphan sessions from the persisted snapshot
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            if std::path::Path::new(&cli.config).exists() {
                println!("{} already exists; leaving it untouched.", cli.config);
                return Ok(());
            }
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let store = open_store(&config)?;
            let (registry, report) = load_registry(store.as_ref(), config.retention)?;
            println!("meshpanel v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Devices: {} / {}   Node databases: {} / {}",
                registry.device_count(),
                config.retention.max_devices,
                registry.node_db_count(),
                config.retention.max_node_databases
            );
            if report.orphans() > 0 {
                println!(
                    "Orphans skipped: {} (run `meshpanel prune` to drop them from disk)",
                    report.orphans()
                );
            }
            for id in registry.device_ids() {
                let marker = if registry.current_id() == Some(id) { "*" } else { " " };
                println!("{} {}", marker, registry.describe_device(id)?);
            }
        }
        Commands::Prune => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let store = open_store(&config)?;
            let (registry, report) = load_registry(store.as_ref(), config.retention)?;
            save_registry(store.as_ref(), &registry)?;
            info!("Pruned {} orphan record(s)", report.orphans());
            println!(
                "Kept {} device(s) and {} node database(s); removed {} orphan(s).",
                report.devices,
                report.node_databases,
                report.orphans()
            );
        }
    }

    Ok(())
}

#[cfg(feature = "persistence")]
fn open_store(config: &Config) -> Result<Box<dyn StateStore>> {
    let dir = config.storage.state_dir();
    let store = meshpanel::persistence::SledStore::open(&dir)
        .map_err(|e| anyhow!("Failed to open state store at {}: {}", dir.display(), e))?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "persistence"))]
fn open_store(_config: &Config) -> Result<Box<dyn StateStore>> {
    Err(anyhow!("meshpanel was built without the `persistence` feature"))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let configured = config
        .as_ref()
        .and_then(|c| log::LevelFilter::from_str(&c.logging.level).ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Only echo to the console when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
