//! Configuration validation.
//!
//! Semantic checks only; serde handles the syntax. Every problem is
//! reported, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::net::address::parse_permissions;
use crate::net::backend::BackendKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no connectors configured")]
    NoConnectors,

    #[error("duplicate connector name '{0}'")]
    DuplicateConnector(String),

    #[error("connector '{0}': unix_domain_socket_path cannot be combined with address or port")]
    UnixPathWithInetAddress(String),

    #[error("connector '{connector}': unix domain sockets are not supported by the {backend} backend")]
    UnixUnsupportedByBackend { connector: String, backend: BackendKind },

    #[error("connector '{0}': unix domain sockets are not supported on this platform")]
    UnixUnsupportedByPlatform(String),

    #[error("connector '{connector}': invalid unix_domain_socket_permissions '{value}'")]
    InvalidPermissions { connector: String, value: String },

    #[error("connector '{connector}': {field} must be greater than 0")]
    Zero { connector: String, field: &'static str },

    #[error("native.pool_capacity must be greater than 0")]
    ZeroPoolCapacity,

    #[error("invalid observability.metrics_address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Check `config`, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.connectors.is_empty() {
        errors.push(ValidationError::NoConnectors);
    }

    let mut names = HashSet::new();
    for connector in &config.connectors {
        let name = &connector.name;
        if !names.insert(name.as_str()) {
            errors.push(ValidationError::DuplicateConnector(name.clone()));
        }

        if connector.unix_domain_socket_path.is_some() {
            if connector.address.is_some() || connector.port.is_some() {
                errors.push(ValidationError::UnixPathWithInetAddress(name.clone()));
            }
            if !cfg!(unix) {
                errors.push(ValidationError::UnixUnsupportedByPlatform(name.clone()));
            } else if config.backend == BackendKind::Native {
                errors.push(ValidationError::UnixUnsupportedByBackend {
                    connector: name.clone(),
                    backend: config.backend,
                });
            }
        }
        if let Some(value) = &connector.unix_domain_socket_permissions {
            if parse_permissions(value).is_none() {
                errors.push(ValidationError::InvalidPermissions {
                    connector: name.clone(),
                    value: value.clone(),
                });
            }
        }

        for (field, value) in [
            ("acceptor_count", connector.acceptor_count),
            ("accept_count", connector.accept_count as usize),
            ("max_connections", connector.max_connections),
        ] {
            if value == 0 {
                errors.push(ValidationError::Zero {
                    connector: name.clone(),
                    field,
                });
            }
        }
    }

    if config.native.pool_capacity == 0 {
        errors.push(ValidationError::ZeroPoolCapacity);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ConnectorConfig;
    use std::path::PathBuf;

    fn connector(name: &str) -> ConnectorConfig {
        ConnectorConfig {
            name: name.to_string(),
            ..ConnectorConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let config = ServerConfig {
            connectors: vec![
                connector("http"),
                ConnectorConfig {
                    acceptor_count: 0,
                    max_connections: 0,
                    ..connector("http")
                },
            ],
            ..ServerConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateConnector("http".to_string()),
                ValidationError::Zero {
                    connector: "http".to_string(),
                    field: "acceptor_count"
                },
                ValidationError::Zero {
                    connector: "http".to_string(),
                    field: "max_connections"
                },
            ]
        );
    }

    #[test]
    fn empty_connector_list_is_rejected() {
        let config = ServerConfig {
            connectors: Vec::new(),
            ..ServerConfig::default()
        };
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::NoConnectors])
        );
    }

    #[cfg(unix)]
    #[test]
    fn unix_path_conflicts() {
        let config = ServerConfig {
            backend: BackendKind::Native,
            connectors: vec![ConnectorConfig {
                port: Some(8080),
                unix_domain_socket_path: Some(PathBuf::from("/tmp/x.sock")),
                unix_domain_socket_permissions: Some("rw-rw----".to_string()),
                ..connector("uds")
            }],
            ..ServerConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::UnixPathWithInetAddress("uds".to_string())));
        assert!(errors.contains(&ValidationError::UnixUnsupportedByBackend {
            connector: "uds".to_string(),
            backend: BackendKind::Native,
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPermissions { .. })));
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "not an address".to_string();
        assert_eq!(validate_config(&config), Ok(()));

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidMetricsAddress(
                "not an address".to_string()
            )])
        );
    }
}
