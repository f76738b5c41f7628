//! Server-level connector: one configured endpoint plus its protocol handler.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConnectorConfig, NativeConfig};
use crate::http::HttpHandler;
use crate::lifecycle::LifecycleState;
use crate::net::address::LocalAddr;
use crate::net::backend::BackendKind;
use crate::net::endpoint::{AnyEndpoint, EndpointSettings};
use crate::net::error::EndpointError;
use crate::net::worker::Dispatcher;

/// A named listen endpoint serving HTTP.
///
/// `stop()` honours the bind policy: with `bind_on_init` the endpoint is only
/// paused and keeps its socket until `destroy()`; otherwise the socket is
/// released and a later `start()` binds again.
pub struct Connector {
    endpoint: AnyEndpoint,
}

impl Connector {
    pub fn new(endpoint: AnyEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_config(
        config: &ConnectorConfig,
        backend: BackendKind,
        native: &NativeConfig,
    ) -> Result<Self, EndpointError> {
        let dispatcher = Dispatcher::new(
            &config.name,
            Arc::new(HttpHandler::new()),
            config.max_connections,
        )
        .with_tcp_no_delay(config.tcp_no_delay);
        let settings = EndpointSettings::from_config(config);
        let endpoint = AnyEndpoint::build(backend, settings, native, dispatcher)?;
        Ok(Self::new(endpoint))
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn state(&self) -> LifecycleState {
        self.endpoint.state()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.endpoint.backend_kind()
    }

    pub fn protocol(&self) -> &'static str {
        self.endpoint.protocol()
    }

    pub fn local_addr(&self) -> Option<LocalAddr> {
        self.endpoint.local_addr()
    }

    pub fn is_bound(&self) -> bool {
        self.endpoint.is_bound()
    }

    pub fn endpoint(&self) -> &AnyEndpoint {
        &self.endpoint
    }

    pub async fn init(&mut self) -> Result<(), EndpointError> {
        self.endpoint.init().await
    }

    pub async fn start(&mut self) -> Result<(), EndpointError> {
        if self.endpoint.state() == LifecycleState::Paused {
            self.endpoint.resume().await?;
        } else {
            self.endpoint.start().await?;
        }
        info!(
            connector = %self.name(),
            protocol = self.protocol(),
            backend = %self.backend_kind(),
            address = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "connector started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), EndpointError> {
        if self.endpoint.policy().releases_on_stop() {
            return self.endpoint.stop().await;
        }
        match self.endpoint.state() {
            LifecycleState::Running => self.endpoint.pause().await,
            LifecycleState::Destroyed => Err(EndpointError::IllegalState {
                operation: "stop",
                state: LifecycleState::Destroyed,
            }),
            state => {
                debug!(connector = %self.name(), state = %state, "stop: socket held until destroy");
                Ok(())
            }
        }
    }

    pub async fn destroy(&mut self) -> Result<(), EndpointError> {
        self.endpoint.destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bind_on_init: bool) -> ConnectorConfig {
        ConnectorConfig {
            name: "test".to_string(),
            address: Some("127.0.0.1".to_string()),
            port: Some(0),
            bind_on_init,
            ..ConnectorConfig::default()
        }
    }

    #[tokio::test]
    async fn stop_pauses_when_bound_on_init() {
        let mut connector =
            Connector::from_config(&config(true), BackendKind::Multiplexed, &NativeConfig::default())
                .unwrap();
        connector.init().await.unwrap();
        connector.start().await.unwrap();
        let addr = connector.local_addr();

        connector.stop().await.unwrap();
        assert_eq!(connector.state(), LifecycleState::Paused);
        assert_eq!(connector.local_addr(), addr);

        connector.start().await.unwrap();
        assert_eq!(connector.state(), LifecycleState::Running);
        assert_eq!(connector.local_addr(), addr);

        connector.destroy().await.unwrap();
        assert!(!connector.is_bound());
    }

    #[tokio::test]
    async fn stop_releases_when_bound_on_start() {
        let mut connector =
            Connector::from_config(&config(false), BackendKind::Blocking, &NativeConfig::default())
                .unwrap();
        connector.init().await.unwrap();
        connector.start().await.unwrap();
        assert_eq!(connector.protocol(), "HTTP/1.1");

        connector.stop().await.unwrap();
        assert_eq!(connector.state(), LifecycleState::Stopped);
        assert!(!connector.is_bound());
        connector.destroy().await.unwrap();
    }
}
