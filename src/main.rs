//! Programmable API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                       GATEWAY                        │
//!                         │                                                      │
//!     Client Request      │  ┌─────────┐    ┌──────────────┐    ┌────────────┐   │
//!     ────────────────────┼─▶│  http   │───▶│ web filters  │───▶│  routing   │   │
//!                         │  │ server  │    │ (weights)    │    │  lookup    │   │
//!                         │  └─────────┘    └──────────────┘    └─────┬──────┘   │
//!                         │                                           │          │
//!                         │                                           ▼          │
//!                         │                                   ┌──────────────┐   │
//!                         │                                   │ route chain  │   │
//!                         │                                   │ rate limit,  │   │
//!                         │                                   │ retry, ...   │   │
//!                         │                                   └──────┬───────┘   │
//!                         │                                          │           │
//!                         │                                          ▼           │
//!     Client Response     │  ┌─────────┐                     ┌──────────────┐    │
//!     ◀───────────────────┼──│ staged  │◀────────────────────│  forwarding  │◀───┼──── Backend
//!                         │  │ headers │                     │   terminal   │    │
//!                         │  └─────────┘                     └──────────────┘    │
//!                         │                                                      │
//!                         │   config + watcher │ observability │ lifecycle       │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use gateway::http::server::apply_config_updates;
use gateway::observability::{logging, metrics};
use gateway::{Gateway, HttpServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "gateway", version, about = "Programmable API gateway")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload routes when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,

    /// Log level used when RUST_LOG is not set (overrides the config file).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    let level = cli.log_level.as_deref().or(config.observability.log_level.as_deref());
    logging::init_logging(level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        services = config.services.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Arc::new(Gateway::from_config(&config, Gateway::builder())?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();

    // Keep the notify watcher alive for the life of the server.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            tokio::spawn(apply_config_updates(gateway.clone(), updates, shutdown.clone()));
            Some(handle)
        }
        _ => None,
    };

    let server = HttpServer::new(gateway);
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
