//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so a minimal file is enough.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::net::address::{parse_permissions, BindAddress};
use crate::net::backend::{BackendKind, SocketOptions};
use crate::net::bind_policy::BindPolicy;

/// Port used when a TCP connector does not name one.
pub const DEFAULT_PORT: u16 = 8080;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket backend shared by every connector.
    pub backend: BackendKind,

    /// Listen endpoints, started in order.
    pub connectors: Vec<ConnectorConfig>,

    /// Native backend settings.
    pub native: NativeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            connectors: vec![ConnectorConfig::default()],
            native: NativeConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// One listen endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Unique name, used in logs and metric labels.
    pub name: String,

    /// Host or IP to bind. All interfaces when omitted.
    pub address: Option<String>,

    /// TCP port; 0 picks an ephemeral port.
    pub port: Option<u16>,

    /// Filesystem path of a Unix domain socket. Excludes `address` and `port`.
    pub unix_domain_socket_path: Option<PathBuf>,

    /// Octal mode applied to the socket file, e.g. `"0660"`.
    pub unix_domain_socket_permissions: Option<String>,

    /// Bind during `init` and hold the socket until `destroy`.
    pub bind_on_init: bool,

    pub acceptor_count: usize,

    /// Listen backlog.
    pub accept_count: u32,

    pub max_connections: usize,

    pub keep_alive: bool,

    pub reuse_address: bool,

    pub tcp_no_delay: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            address: None,
            port: None,
            unix_domain_socket_path: None,
            unix_domain_socket_permissions: None,
            bind_on_init: true,
            acceptor_count: 1,
            accept_count: 100,
            max_connections: 8192,
            keep_alive: true,
            reuse_address: true,
            tcp_no_delay: true,
        }
    }
}

impl ConnectorConfig {
    pub fn bind_address(&self) -> BindAddress {
        match &self.unix_domain_socket_path {
            Some(path) => BindAddress::unix(path.clone()),
            None => BindAddress::tcp(
                self.address.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
                self.port.unwrap_or(DEFAULT_PORT),
            ),
        }
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            reuse_address: self.reuse_address,
            keep_alive: self.keep_alive,
            backlog: self.accept_count,
            unix_permissions: self
                .unix_domain_socket_permissions
                .as_deref()
                .and_then(parse_permissions),
        }
    }

    pub fn policy(&self) -> BindPolicy {
        BindPolicy::new(self.bind_on_init)
    }
}

/// Native backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Maximum number of live native listen sockets per connector.
    pub pool_capacity: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self { pool_capacity: 64 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `tracing-subscriber` filter directive; `RUST_LOG` overrides it.
    pub log_filter: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: crate::observability::logging::DEFAULT_FILTER.to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
