//! WishRing Service - ring sync daemon and counter CLI.
//!
//! Run with: `cargo run -p wishring-service`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use wishring_core::{BleTransport, CounterEngine, Link, SyncService};
use wishring_service::{Config, StatsReport, StatusReport, default_config_path, recent_history};
use wishring_store::Store;

/// WishRing Service - keeps the ring's counter in sync with the local database.
#[derive(Parser, Debug)]
#[command(name = "wishring-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Ring address (overrides config).
    #[arg(long, global = true)]
    device: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the ring and sync until Ctrl-C (default behavior).
    Run,

    /// Print today's record and streak as JSON.
    Status,

    /// Add to today's count.
    Increment {
        #[arg(short, long, default_value_t = 1)]
        amount: i64,
    },

    /// Change today's active wish.
    SwitchWish {
        /// Zero-based wish index.
        index: usize,
    },

    /// Print recent daily records as JSON.
    History {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Print counter and reset statistics as JSON.
    Stats {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Delete reset events older than the retention window.
    Prune {
        /// Retention in days (defaults to the configured value).
        #[arg(long)]
        days: Option<u32>,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration.
    Show,

    /// Check the configuration file for errors.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    if let Some(Command::Config { action }) = &args.command {
        return handle_config_action(action, &config_path);
    }

    let config = load_config(&args)?;
    let engine = Arc::new(open_engine(&config)?);

    match args.command {
        Some(Command::Run) | None => run_service(&config, engine).await,
        Some(Command::Status) => print_json(&StatusReport::collect(&engine).await?),
        Some(Command::Increment { amount }) => {
            let record = engine
                .increment(amount, wishring_core::IncrementSource::App)
                .await?;
            print_json(&record)
        }
        Some(Command::SwitchWish { index }) => {
            print_json(&engine.switch_active_wish(index).await?)
        }
        Some(Command::History { days }) => print_json(&recent_history(&engine, days).await?),
        Some(Command::Stats { days }) => print_json(&StatsReport::collect(&engine, days).await?),
        Some(Command::Prune { days }) => {
            let days = days.unwrap_or(config.storage.reset_retention_days);
            let deleted = engine
                .prune_reset_events(time::Duration::days(i64::from(days)))
                .await?;
            println!("Deleted {} reset event(s) older than {} day(s)", deleted, days);
            Ok(())
        }
        // Handled before the database is opened.
        Some(Command::Config { .. }) => Ok(()),
    }
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("wishring_service={}", level).parse()?)
                .add_directive(format!("wishring_core={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Load the configuration file and apply command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(address) = &args.device {
        config.device.address = Some(address.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_engine(config: &Config) -> anyhow::Result<CounterEngine> {
    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;
    Ok(CounterEngine::new(store, config.engine_config())?)
}

async fn run_service(config: &Config, engine: Arc<CounterEngine>) -> anyhow::Result<()> {
    match engine
        .prune_reset_events(engine.config().reset_retention)
        .await
    {
        Ok(0) => {}
        Ok(n) => info!("Pruned {} expired reset event(s)", n),
        Err(e) => warn!("Failed to prune reset events: {}", e),
    }

    let transport = Arc::new(BleTransport::new().await?);
    let link = Arc::new(Link::new(transport, config.link_config()));
    let service = SyncService::new(engine, link);

    let mut resets = service.subscribe_resets();
    let mut connection = service.subscribe_connection_state();
    let mut failures = service.subscribe_failures();
    service.start().await;
    info!("Syncing; press Ctrl-C to stop");

    let stopped = service.wait();
    tokio::pin!(stopped);

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            result = &mut stopped => break result,
            Ok(state) = connection.recv() => info!("Connection: {:?}", state),
            Ok(failure) = failures.recv() => {
                warn!(
                    "Ring event not recorded after {} attempt(s): {} ({} dropped so far)",
                    failure.attempts,
                    failure.error,
                    service.dropped_events()
                );
            }
            Ok(event) = resets.recv() => {
                info!(
                    "Reset logged: {} lost ({:?}, {:?} impact)",
                    event.previous_count,
                    event.cause,
                    event.impact()
                );
            }
        }
    };

    service.shutdown().await;
    outcome?;
    Ok(())
}

fn handle_config_action(action: &ConfigAction, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Show => {
            let config = if path.exists() {
                Config::load(path)?
            } else {
                Config::default()
            };
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate => {
            Config::load_validated(path)?;
            println!("{} is valid", path.display());
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
