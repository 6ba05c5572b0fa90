//! Dark Pot - collect topic cards and draw them at random
//!
//! One binary for every role: `darkpot relay` runs the message relay,
//! `darkpot host <name>` creates and hosts a session, `darkpot join <id>`
//! joins one.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use darkpot_net::RelayServer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod cleanup;
mod config;
mod console;
mod engine;
mod error;
mod state;

use config::AppConfig;
use console::Entry;
use state::AppState;

#[derive(Parser)]
#[command(name = "darkpot", version, about = "Collect topic cards and draw them at random")]
struct Cli {
    /// Config file (default: darkpot.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay address, overrides the config file
    #[arg(long, global = true)]
    relay: Option<SocketAddr>,

    /// Shared database path, overrides the config file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay that peers connect through
    Relay {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create a session and host it
    Host { name: String },
    /// Join a session by id
    Join { session_id: Uuid },
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("darkpot: {}", e);
            std::process::exit(2);
        }
    };

    // Initialize logging; RUST_LOG wins over the configured filter
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    info!("Starting Dark Pot");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command, config)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> error::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(relay) = cli.relay {
        config.relay_addr = relay;
    }
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

async fn run(command: Command, config: AppConfig) -> error::Result<()> {
    match command {
        Command::Relay { port } => {
            let port = port.unwrap_or(config.relay_port);
            let server = RelayServer::start(SocketAddr::from(([0, 0, 0, 0], port))).await?;
            info!(addr = %server.addr(), "Relay running, Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            server.shutdown();
            Ok(())
        }
        Command::Host { name } => run_console(config, Entry::Host(name)).await,
        Command::Join { session_id } => run_console(config, Entry::Join(session_id)).await,
    }
}

async fn run_console(config: AppConfig, entry: Entry) -> error::Result<()> {
    let join_timeout = config.join_timeout();
    // Opening the databases and the startup purge block on SQLite
    let state = tokio::task::spawn_blocking(move || AppState::new(config))
        .await
        .map_err(|e| std::io::Error::other(format!("startup task failed: {}", e)))??;
    let (handle, task) = state.spawn_engine();

    let result = console::run(handle, entry, join_timeout).await;

    // The console dropped the last handle; the engine leaves and stops
    if let Err(e) = task.await {
        warn!(error = %e, "Engine task failed");
    }
    result
}
