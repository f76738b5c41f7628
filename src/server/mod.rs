//! Server: the set of configured connectors and their shared lifecycle.
//!
//! # Data Flow
//! ```text
//! ServerConfig
//!     → Connector::from_config (one per [[connectors]] entry)
//!     → init (bind-on-init connectors bind here)
//!     → start (remaining binds, acceptors launched)
//!     → stop / destroy on shutdown
//! ```
//!
//! # Design Decisions
//! - `init` and `start` are fatal: on failure every connector is destroyed
//! - `stop` and `destroy` are best effort and only log

pub mod connector;

pub use connector::Connector;

use thiserror::Error;
use tracing::{error, info};

use crate::config::{ConfigError, ServerConfig};
use crate::net::error::EndpointError;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("connector '{connector}': {source}")]
    Connector {
        connector: String,
        #[source]
        source: EndpointError,
    },

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

impl StartupError {
    fn connector(connector: &str, source: EndpointError) -> Self {
        StartupError::Connector {
            connector: connector.to_string(),
            source,
        }
    }
}

/// All connectors of one process.
pub struct Server {
    connectors: Vec<Connector>,
}

impl Server {
    pub fn new(connectors: Vec<Connector>) -> Self {
        Self { connectors }
    }

    /// Build every connector. Nothing is bound yet.
    pub fn from_config(config: &ServerConfig) -> Result<Self, StartupError> {
        let connectors = config
            .connectors
            .iter()
            .map(|connector| {
                Connector::from_config(connector, config.backend, &config.native)
                    .map_err(|e| StartupError::connector(&connector.name, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(connectors))
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn connector(&self, name: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.name() == name)
    }

    pub async fn init(&mut self) -> Result<(), StartupError> {
        for index in 0..self.connectors.len() {
            if let Err(e) = self.connectors[index].init().await {
                let name = self.connectors[index].name().to_string();
                error!(connector = %name, error = %e, "connector init failed");
                self.destroy().await;
                return Err(StartupError::connector(&name, e));
            }
        }
        Ok(())
    }

    pub async fn start(&mut self) -> Result<(), StartupError> {
        for index in 0..self.connectors.len() {
            if let Err(e) = self.connectors[index].start().await {
                let name = self.connectors[index].name().to_string();
                error!(connector = %name, error = %e, "connector start failed");
                self.destroy().await;
                return Err(StartupError::connector(&name, e));
            }
        }
        info!(connectors = self.connectors.len(), "server started");
        Ok(())
    }

    /// Stop every connector, logging failures.
    pub async fn stop(&mut self) {
        for connector in &mut self.connectors {
            if let Err(e) = connector.stop().await {
                error!(connector = %connector.name(), error = %e, "connector stop failed");
            }
        }
    }

    /// Destroy every connector that is not destroyed yet, logging failures.
    pub async fn destroy(&mut self) {
        for connector in &mut self.connectors {
            if connector.state() == crate::lifecycle::LifecycleState::Destroyed {
                continue;
            }
            if let Err(e) = connector.destroy().await {
                error!(connector = %connector.name(), error = %e, "connector destroy failed");
            }
        }
        info!("server destroyed");
    }
}
