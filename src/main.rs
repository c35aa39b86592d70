//! # Gauge Bridge
//!
//! Turn a MAVLink telemetry link into live gauge feeds.
//!
//! Two subcommands share one binary:
//!
//! - `listen` runs on the companion computer: it reads the MAVLink link,
//!   publishes gauge snapshots at a fixed rate and serves them over SSE and
//!   WebSocket.
//! - `relay` runs on the other side of the network: it keeps a reconnecting
//!   client connection to a companion's stream and republishes it locally.
//!
//! # Examples
//!
//! ```bash
//! gauge-bridge --config config/gauge-bridge.toml listen
//! RUST_LOG=debug gauge-bridge relay
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gauge_bridge::config::{Config, LoggingConfig};
use gauge_bridge::fanout::Publisher;
use gauge_bridge::link::spawn_listener;
use gauge_bridge::relay::RelayBridge;
use gauge_bridge::server::{self, companion, relay};
use gauge_bridge::shutdown::Shutdown;

#[derive(Debug, Parser)]
#[command(name = "gauge-bridge", version, about = "MAVLink gauge feed and relay bridge")]
struct Cli {
    /// Path to the TOML configuration file (defaults apply if it is missing)
    #[arg(long, short, default_value = "config/gauge-bridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read the MAVLink link and serve the live feed
    Listen,
    /// Relay a companion's feed to local subscribers
    Relay,
}

/// Console logging plus an optional daily-rolling log file.
///
/// The returned guard must live as long as the program so buffered file
/// output is flushed on exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = if config.file_enabled {
        let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

async fn run_listen(config: Config, shutdown: Shutdown) -> Result<()> {
    let publisher = Publisher::with_capacity(config.server.stream_capacity, config.server.ws_capacity);

    let listener = spawn_listener(&config.link, publisher.clone(), shutdown.clone())
        .context("Failed to start MAVLink listener")?;
    info!("Listening for MAVLink on {}", config.link.url);

    let state = companion::CompanionState::new(publisher, &config.link, &config.server);
    let result = server::serve(companion::router(state), &config.server.bind, shutdown.clone())
        .await
        .with_context(|| format!("Companion server on {} failed", config.server.bind));

    shutdown.trigger();
    let sessions = tokio::task::spawn_blocking(move || listener.join())
        .await
        .context("Listener join task failed")?
        .map_err(|_| anyhow::anyhow!("Listener thread panicked"))?;
    info!("Listener ran {} session(s)", sessions);

    result
}

async fn run_relay(config: Config, shutdown: Shutdown) -> Result<()> {
    let bridge = RelayBridge::from_config(&config.relay, shutdown.clone());
    bridge.ensure_started().context("Failed to start relay bridge")?;
    info!("Relaying {}", config.relay.stream_url());

    let state = relay::RelayState::new(bridge, &config.relay, &config.server);
    server::serve(relay::router(state), &config.relay.bind, shutdown)
        .await
        .with_context(|| format!("Relay server on {} failed", config.relay.bind))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let _log_guard = init_logging(&config.logging);
    info!("Gauge Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();

    match cli.command {
        Command::Listen => run_listen(config, shutdown).await,
        Command::Relay => run_relay(config, shutdown).await,
    }
}
