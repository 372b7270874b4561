//! pitwall-relay - serve simulator telemetry to a local UI client
//!
//! Loads user preferences, starts the websocket server on the configured port
//! and, when given a recording, replays it as the telemetry source.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use pitwall_relay::sources::ReplaySource;
use pitwall_relay::{PreferenceStore, Relay, RelayConfig, RelayError, logging, server};

#[derive(Debug, Parser)]
#[command(name = "pitwall-relay", version, about = "Relay simulator telemetry to a UI client")]
struct Args {
    /// Preferences file (defaults to %APPDATA%/pitwall-relay/userPreferences.json)
    #[arg(long)]
    preferences: Option<PathBuf>,

    /// Port to listen on, overriding PortNumber from the preferences
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Replay a JSON-lines session recording instead of waiting for a live source
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Milliseconds between delivery queue drain passes
    #[arg(long, default_value_t = 1000)]
    drain_interval_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "pitwall_relay=info")]
    log_level: String,

    /// Directory for the daily log file (defaults to logs/ beside the preferences)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    let log_dir = args.log_dir.clone().unwrap_or_else(logging::default_log_dir);
    let (log_file, _log_guard) = logging::open_log_file(&log_dir)
        .with_context(|| format!("failed to open log directory {}", log_dir.display()))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(log_file).with_ansi(false))
        .try_init()
        .context("failed to install log subscriber")?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Writing logs to {}", log_dir.display());

    let store = match &args.preferences {
        Some(path) => PreferenceStore::new(path),
        None => PreferenceStore::at_default_location(),
    };
    let preferences = store.load().context("failed to load preferences")?;
    info!(
        frequency = preferences.telemetry_update_frequency,
        port = preferences.port_number,
        "Loaded preferences from {}",
        store.path().display()
    );

    let config = RelayConfig {
        drain_interval: Duration::from_millis(args.drain_interval_ms.max(1)),
        ..RelayConfig::from(&preferences)
    };
    let relay = Relay::new(config);

    let driver = match &args.replay {
        Some(path) => {
            let source = ReplaySource::open(path, relay.sampling())
                .await
                .with_context(|| format!("failed to open recording {}", path.display()))?;
            Some(relay.spawn_source(source))
        }
        None => {
            info!("No telemetry source configured, serving connection lifecycle only");
            None
        }
    };

    let addr = SocketAddr::new(args.bind, args.port.unwrap_or(preferences.port_number));
    let listener = TcpListener::bind(addr).await.map_err(|source| RelayError::Bind { addr, source })?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
            }
        }
    });

    let served = server::serve(listener, relay.connections().clone(), shutdown).await;
    relay.shutdown().await;

    if let Some(driver) = driver {
        driver.cancel();
        let stats = driver.join().await;
        info!(events = stats.events, ticks = stats.ticks, "Telemetry source stopped");
    }

    served?;
    info!("Relay stopped");
    Ok(())
}
