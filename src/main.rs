//! Deck Relay - control panel backend
//!
//! Serves the panel API, keeps a link to the PC agent and drives LAN bulbs.

use anyhow::{Context, Result};
use clap::Parser;
use deckrelay_api::{ApiServer, ApiServerConfig};
use deckrelay_lib::{AgentAddress, ConfigStore, GatewayConfig, RelayGateway};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Deck Relay - relay panel actions to a PC agent and LAN devices
#[derive(Parser, Debug)]
#[command(name = "deckrelay")]
#[command(about = "Deck Relay - relay panel actions to a PC agent and LAN devices")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Panel configuration file
    #[arg(long, env = "DECKRELAY_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Address the HTTP API listens on
    #[arg(long, env = "DECKRELAY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// PC agent address (host:port), overrides `pcServer` from the config file
    #[arg(long, env = "DECKRELAY_AGENT")]
    agent: Option<AgentAddress>,

    /// Seconds to wait before reconnecting to the agent
    #[arg(long, default_value = "10")]
    retry_delay_secs: u64,

    /// Seconds a bulb connection may stay idle before it is closed
    #[arg(long, default_value = "60")]
    idle_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Setup logging; `RUST_LOG` takes precedence over `--verbose`
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    info!("Deck Relay starting...");

    let store = ConfigStore::new(&cli.config);
    let panel = store
        .load()
        .await
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    let mut config = GatewayConfig::default();
    config.link.retry_delay = Duration::from_secs(cli.retry_delay_secs);
    config.devices.idle_timeout = Duration::from_secs(cli.idle_timeout_secs);

    let gateway = Arc::new(RelayGateway::new(config));

    gateway.sensors().set_url(panel.sensor_endpoint());
    let agent = cli.agent.or(panel.pc_server);
    gateway.start(agent);

    info!("Config file: {}", store.path().display());
    info!("Sensor bridge: {}", gateway.sensors().url());
    info!("HTTP API: http://{}", cli.bind);

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: cli.bind,
            enable_cors: true,
        },
        gateway.clone(),
        store,
    );

    let result = server.start(shutdown_signal()).await;

    gateway.shutdown().await;
    info!("Deck Relay stopped");

    result
}
