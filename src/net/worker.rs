//! Handoff from acceptors to the worker side.
//!
//! Acceptors reserve a connection slot before calling `accept`, so an
//! endpoint at `max_connections` stops pulling connections off the backlog
//! instead of accepting and dropping them.

use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn, Instrument};

use crate::net::connection::{Connection, ConnectionTracker};
use crate::observability::metrics;

/// Protocol layer that consumes accepted connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Protocol name reported in logs, e.g. `"HTTP/1.1"`.
    fn protocol(&self) -> &'static str;

    /// Serve one connection to completion.
    fn handle(&self, connection: Connection) -> BoxFuture<'static, io::Result<()>>;
}

/// Hands accepted connections to a [`ConnectionHandler`] on the runtime.
#[derive(Clone)]
pub struct Dispatcher {
    endpoint: Arc<str>,
    handler: Arc<dyn ConnectionHandler>,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    tracker: ConnectionTracker,
    tcp_no_delay: bool,
}

impl Dispatcher {
    pub fn new(endpoint: &str, handler: Arc<dyn ConnectionHandler>, max_connections: usize) -> Self {
        Self {
            endpoint: Arc::from(endpoint),
            handler,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            tracker: ConnectionTracker::new(),
            tcp_no_delay: true,
        }
    }

    pub fn with_tcp_no_delay(mut self, enabled: bool) -> Self {
        self.tcp_no_delay = enabled;
        self
    }

    pub fn protocol(&self) -> &'static str {
        self.handler.protocol()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait for a free connection slot.
    pub async fn reserve(&self) -> Option<ConnectionPermit> {
        self.connection_limit
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| ConnectionPermit { _permit: permit })
    }

    /// Spawn the handler for `connection`, holding `permit` until it finishes.
    pub fn dispatch(&self, connection: Connection, permit: ConnectionPermit) {
        if self.tcp_no_delay {
            if let Some(tcp) = connection.stream().tcp_stream() {
                if let Err(e) = tcp.set_nodelay(true) {
                    warn!(endpoint = %self.endpoint, error = %e, "failed to set TCP_NODELAY");
                }
            }
        }

        let guard = self.tracker.track(connection.id());
        let span = tracing::info_span!(
            "conn",
            endpoint = %self.endpoint,
            id = %connection.id(),
            peer = %connection.peer()
        );
        debug!(parent: &span, available_permits = self.available_permits(), "connection accepted");
        metrics::connection_accepted(&self.endpoint);
        metrics::active_connections(&self.endpoint, self.tracker.active_count());

        let future = self.handler.handle(connection);
        let tracker = self.tracker.clone();
        let endpoint = Arc::clone(&self.endpoint);
        tokio::spawn(
            async move {
                if let Err(e) = future.await {
                    debug!(error = %e, "connection ended with error");
                }
                drop(guard);
                drop(permit);
                metrics::active_connections(&endpoint, tracker.active_count());
            }
            .instrument(span),
        );
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
