//! listen-endpoint
//!
//! Serves the configured connectors until SIGINT or SIGTERM.
//!
//! ```text
//!   config.toml ──▶ Server ──▶ Connector ──▶ Endpoint<Backend> ──▶ acceptors ──▶ HTTP handler
//!                                               │
//!                                   bind on init / bind on start
//! ```

use std::path::PathBuf;

use clap::Parser;

use listen_endpoint::config::{self, ServerConfig};
use listen_endpoint::lifecycle::signals::shutdown_signal;
use listen_endpoint::net::BackendKind;
use listen_endpoint::observability::{logging, metrics};
use listen_endpoint::{Server, StartupError};

#[derive(Debug, Parser)]
#[command(name = "listen-endpoint", version, about = "Listen endpoints with pluggable socket backends")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured socket backend.
    #[arg(short, long)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
        config::validation::validate_config(&config)
            .map_err(|errors| StartupError::Config(config::ConfigError::Validation(errors)))?;
    }

    logging::init(&config.observability.log_filter)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend,
        connectors = config.connectors.len(),
        "listen-endpoint starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut server = Server::from_config(&config)?;
    server.init().await?;
    server.start().await?;

    shutdown_signal().await;

    server.stop().await;
    server.destroy().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
