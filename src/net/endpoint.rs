//! Listen endpoint state machine.
//!
//! # State Transitions
//! ```text
//! New ──init──▶ Initialized ──start──▶ Running ──stop──▶ Stopped
//!                    │                  │  ▲                │
//!                    │             pause│  │resume          │start
//!                    │                  ▼  │                ▼
//!                    │                 Paused            Running
//!                    └──────────────destroy──────────────▶ Destroyed
//! ```
//!
//! The endpoint holds `Some(handle)` exactly while its socket is bound. The
//! listen handle is only ever dropped after the acceptors sharing it have
//! been joined, so when `stop()` returns the descriptor is closed and the
//! port or path can be bound by anyone.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ConnectorConfig, NativeConfig};
use crate::lifecycle::LifecycleState;
use crate::net::acceptor::AcceptorGroup;
use crate::net::address::{BindAddress, LocalAddr};
use crate::net::backend::{
    BackendKind, BlockingBackend, ListenHandle, MultiplexedBackend, NativeBackend, SocketBackend,
    SocketOptions,
};
use crate::net::bind_policy::{BindPolicy, Phase};
use crate::net::error::EndpointError;
use crate::net::worker::Dispatcher;
use crate::observability::metrics;

/// Static settings of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub name: String,
    pub address: BindAddress,
    pub options: SocketOptions,
    pub policy: BindPolicy,
    pub acceptor_count: usize,
}

impl EndpointSettings {
    pub fn new(name: impl Into<String>, address: BindAddress) -> Self {
        Self {
            name: name.into(),
            address,
            options: SocketOptions::default(),
            policy: BindPolicy::default(),
            acceptor_count: 1,
        }
    }

    pub fn bind_on_init(mut self, bind_on_init: bool) -> Self {
        self.policy = BindPolicy::new(bind_on_init);
        self
    }

    pub fn acceptors(mut self, count: usize) -> Self {
        self.acceptor_count = count;
        self
    }

    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            name: config.name.clone(),
            address: config.bind_address(),
            options: config.socket_options(),
            policy: BindPolicy::new(config.bind_on_init),
            acceptor_count: config.acceptor_count,
        }
    }
}

/// Owner of one listen socket across `init → start → stop → destroy`.
///
/// Lifecycle calls take `&mut self` and are therefore serialized; only
/// `accept` runs concurrently with them, inside the acceptor tasks.
pub struct Endpoint<B: SocketBackend> {
    name: Arc<str>,
    backend: Arc<B>,
    address: BindAddress,
    options: SocketOptions,
    policy: BindPolicy,
    acceptor_count: usize,
    dispatcher: Dispatcher,
    state: LifecycleState,
    listen: Option<Arc<B::Handle>>,
    acceptors: Option<AcceptorGroup>,
}

impl<B: SocketBackend> Endpoint<B> {
    /// Create an endpoint. Fails with `Unsupported` if `backend` cannot serve
    /// the address family, before any socket is created.
    pub fn new(
        settings: EndpointSettings,
        backend: B,
        dispatcher: Dispatcher,
    ) -> Result<Self, EndpointError> {
        if !backend.supports(settings.address.family()) {
            return Err(EndpointError::Unsupported {
                backend: backend.kind(),
                feature: "unix domain sockets",
            });
        }
        Ok(Self {
            name: Arc::from(settings.name),
            backend: Arc::new(backend),
            address: settings.address,
            options: settings.options,
            policy: settings.policy,
            acceptor_count: settings.acceptor_count.max(1),
            dispatcher,
            state: LifecycleState::New,
            listen: None,
            acceptors: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn address(&self) -> &BindAddress {
        &self.address
    }

    pub fn policy(&self) -> BindPolicy {
        self.policy
    }

    /// True while the listen socket is held at the OS level.
    pub fn is_bound(&self) -> bool {
        self.listen.is_some()
    }

    /// Address the listen socket is bound to, while bound.
    pub fn local_addr(&self) -> Option<LocalAddr> {
        self.listen.as_ref().map(|handle| handle.local_addr().clone())
    }

    pub fn protocol(&self) -> &'static str {
        self.dispatcher.protocol()
    }

    pub fn active_connections(&self) -> u64 {
        self.dispatcher.active_connections()
    }

    /// `New → Initialized`, binding now if the policy says so. On failure the
    /// endpoint stays `New`.
    pub async fn init(&mut self) -> Result<(), EndpointError> {
        if self.state != LifecycleState::New {
            return Err(self.illegal("init"));
        }
        if self.policy.should_bind_now(Phase::Init, self.is_bound()) {
            self.bind()?;
        }
        self.transition(LifecycleState::Initialized);
        Ok(())
    }

    /// `Initialized | Stopped → Running`. Binds if not bound yet, then
    /// launches the acceptors. A `New` endpoint is initialized first.
    pub async fn start(&mut self) -> Result<(), EndpointError> {
        match self.state {
            LifecycleState::New => self.init().await?,
            LifecycleState::Initialized | LifecycleState::Stopped => {}
            _ => return Err(self.illegal("start")),
        }
        if self.policy.should_bind_now(Phase::Start, self.is_bound()) {
            self.bind()?;
        }
        self.launch_acceptors();
        self.transition(LifecycleState::Running);
        Ok(())
    }

    /// `Running → Paused`: halt the acceptors but keep the socket bound.
    /// Connections an acceptor already took are served; the rest queue in
    /// the backlog until `resume`.
    pub async fn pause(&mut self) -> Result<(), EndpointError> {
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Paused => return Ok(()),
            _ => return Err(self.illegal("pause")),
        }
        if let Some(group) = self.acceptors.take() {
            group.halt();
            if let (false, Some(handle)) = (B::CANCEL_SAFE_ACCEPT, &self.listen) {
                let backend = Arc::clone(&self.backend);
                let handle = Arc::clone(handle);
                let count = group.len();
                // Dialing blocks; keep it off the runtime threads.
                let unlocked = tokio::task::spawn_blocking(move || {
                    backend.unlock_accept(&handle, count);
                })
                .await;
                if let Err(e) = unlocked {
                    warn!(endpoint = %self.name, error = %e, "failed to unlock acceptors");
                }
            }
            group.join().await;
        }
        self.transition(LifecycleState::Paused);
        Ok(())
    }

    /// `Paused → Running` without binding again.
    pub async fn resume(&mut self) -> Result<(), EndpointError> {
        match self.state {
            LifecycleState::Paused => {}
            LifecycleState::Running => return Ok(()),
            _ => return Err(self.illegal("resume")),
        }
        self.launch_acceptors();
        self.transition(LifecycleState::Running);
        Ok(())
    }

    /// Halt the acceptors and release the listen socket. Calling it on an
    /// endpoint that is already stopped, or was never initialized, does
    /// nothing.
    ///
    /// Only `IllegalState` is returned; cleanup problems are logged.
    pub async fn stop(&mut self) -> Result<(), EndpointError> {
        match self.state {
            LifecycleState::Running | LifecycleState::Paused | LifecycleState::Initialized => {}
            LifecycleState::New | LifecycleState::Stopped => {
                debug!(endpoint = %self.name, state = %self.state, "stop: nothing to do");
                return Ok(());
            }
            LifecycleState::Destroyed => return Err(self.illegal("stop")),
        }

        let acceptors = self.acceptors.take();
        if let Some(group) = &acceptors {
            group.halt();
        }
        if let Some(handle) = &self.listen {
            let backend = Arc::clone(&self.backend);
            let handle = Arc::clone(handle);
            // Closing may dial the socket to wake blocked threads.
            let closed =
                tokio::task::spawn_blocking(move || backend.close_listen_socket(&handle)).await;
            if let Err(e) = closed {
                error!(endpoint = %self.name, error = %e, "failed to close listen socket");
            }
        }
        if let Some(group) = acceptors {
            group.join().await;
        }
        self.release();
        self.transition(LifecycleState::Stopped);
        Ok(())
    }

    /// Release everything, stopping first if needed. Terminal.
    pub async fn destroy(&mut self) -> Result<(), EndpointError> {
        match self.state {
            LifecycleState::Destroyed => return Err(self.illegal("destroy")),
            LifecycleState::Running | LifecycleState::Paused | LifecycleState::Initialized => {
                self.stop().await?;
            }
            LifecycleState::New | LifecycleState::Stopped => {}
        }
        self.release();
        if let Err(e) = self.backend.destroy() {
            error!(endpoint = %self.name, backend = %self.backend.kind(), error = %e, "failed to destroy backend resources");
        }
        self.transition(LifecycleState::Destroyed);
        Ok(())
    }

    fn bind(&mut self) -> Result<(), EndpointError> {
        let handle = self
            .backend
            .create_listen_socket(&self.address, &self.options)
            .inspect_err(|e| {
                error!(endpoint = %self.name, address = %self.address, backend = %self.backend.kind(), error = %e, "bind failed");
            })?;
        info!(
            endpoint = %self.name,
            address = %handle.local_addr(),
            backend = %self.backend.kind(),
            "listen socket bound"
        );
        metrics::listen_socket_bound(&self.name, self.backend.kind());
        self.listen = Some(Arc::new(handle));
        Ok(())
    }

    /// Close and drop the listen handle, if held.
    fn release(&mut self) {
        let Some(handle) = self.listen.take() else {
            return;
        };
        self.backend.close_listen_socket(&handle);
        let local = handle.local_addr().clone();
        match Arc::try_unwrap(handle) {
            Ok(handle) => drop(handle),
            Err(handle) => {
                // Only acceptors share the handle and they are joined by now.
                warn!(
                    endpoint = %self.name,
                    owners = Arc::strong_count(&handle),
                    "listen socket still shared at release"
                );
            }
        }
        info!(endpoint = %self.name, address = %local, "listen socket released");
        metrics::listen_socket_released(&self.name);
    }

    fn launch_acceptors(&mut self) {
        let Some(handle) = &self.listen else {
            return;
        };
        info!(
            endpoint = %self.name,
            address = %handle.local_addr(),
            acceptors = self.acceptor_count,
            protocol = self.dispatcher.protocol(),
            "starting acceptors"
        );
        self.acceptors = Some(AcceptorGroup::spawn(
            &self.name,
            self.acceptor_count,
            &self.backend,
            handle,
            &self.dispatcher,
        ));
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(endpoint = %self.name, from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
    }

    fn illegal(&self, operation: &'static str) -> EndpointError {
        EndpointError::IllegalState {
            operation,
            state: self.state,
        }
    }
}

/// Dropping a bound endpoint halts its acceptors and closes the socket in
/// the background. Call `destroy()` first to release it deterministically.
impl<B: SocketBackend> Drop for Endpoint<B> {
    fn drop(&mut self) {
        if let Some(group) = &self.acceptors {
            group.halt();
        }
        let Some(handle) = self.listen.take() else {
            return;
        };
        warn!(endpoint = %self.name, state = %self.state, "endpoint dropped while bound");
        let backend = Arc::clone(&self.backend);
        // Closing may dial; keep it off the runtime's worker threads.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || backend.close_listen_socket(&handle));
            }
            Err(_) => backend.close_listen_socket(&handle),
        }
    }
}

/// An endpoint whose backend was picked by configuration.
pub enum AnyEndpoint {
    Blocking(Endpoint<BlockingBackend>),
    Multiplexed(Endpoint<MultiplexedBackend>),
    Native(Endpoint<NativeBackend>),
}

macro_rules! with_endpoint {
    ($self:expr, $ep:ident => $body:expr) => {
        match $self {
            AnyEndpoint::Blocking($ep) => $body,
            AnyEndpoint::Multiplexed($ep) => $body,
            AnyEndpoint::Native($ep) => $body,
        }
    };
}

impl AnyEndpoint {
    /// Build the endpoint for `kind`. Unsupported address families and an
    /// unusable native pool are reported here, before any bind.
    pub fn build(
        kind: BackendKind,
        settings: EndpointSettings,
        native: &NativeConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self, EndpointError> {
        Ok(match kind {
            BackendKind::Blocking => {
                AnyEndpoint::Blocking(Endpoint::new(settings, BlockingBackend::new(), dispatcher)?)
            }
            BackendKind::Multiplexed => AnyEndpoint::Multiplexed(Endpoint::new(
                settings,
                MultiplexedBackend::new(),
                dispatcher,
            )?),
            BackendKind::Native => AnyEndpoint::Native(Endpoint::new(
                settings,
                NativeBackend::new(native.pool_capacity)?,
                dispatcher,
            )?),
        })
    }

    pub fn name(&self) -> &str {
        with_endpoint!(self, ep => ep.name())
    }

    pub fn state(&self) -> LifecycleState {
        with_endpoint!(self, ep => ep.state())
    }

    pub fn backend_kind(&self) -> BackendKind {
        with_endpoint!(self, ep => ep.backend_kind())
    }

    pub fn policy(&self) -> BindPolicy {
        with_endpoint!(self, ep => ep.policy())
    }

    pub fn is_bound(&self) -> bool {
        with_endpoint!(self, ep => ep.is_bound())
    }

    pub fn local_addr(&self) -> Option<LocalAddr> {
        with_endpoint!(self, ep => ep.local_addr())
    }

    pub fn protocol(&self) -> &'static str {
        with_endpoint!(self, ep => ep.protocol())
    }

    pub fn active_connections(&self) -> u64 {
        with_endpoint!(self, ep => ep.active_connections())
    }

    pub async fn init(&mut self) -> Result<(), EndpointError> {
        with_endpoint!(self, ep => ep.init().await)
    }

    pub async fn start(&mut self) -> Result<(), EndpointError> {
        with_endpoint!(self, ep => ep.start().await)
    }

    pub async fn pause(&mut self) -> Result<(), EndpointError> {
        with_endpoint!(self, ep => ep.pause().await)
    }

    pub async fn resume(&mut self) -> Result<(), EndpointError> {
        with_endpoint!(self, ep => ep.resume().await)
    }

    pub async fn stop(&mut self) -> Result<(), EndpointError> {
        with_endpoint!(self, ep => ep.stop().await)
    }

    pub async fn destroy(&mut self) -> Result<(), EndpointError> {
        with_endpoint!(self, ep => ep.destroy().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::Connection;
    use crate::net::worker::ConnectionHandler;
    use futures_util::future::BoxFuture;

    struct Discard;

    impl ConnectionHandler for Discard {
        fn protocol(&self) -> &'static str {
            "discard"
        }

        fn handle(&self, _connection: Connection) -> BoxFuture<'static, std::io::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn endpoint(bind_on_init: bool) -> Endpoint<MultiplexedBackend> {
        let settings = EndpointSettings::new("test", BindAddress::tcp("127.0.0.1", 0))
            .bind_on_init(bind_on_init);
        let dispatcher = Dispatcher::new("test", Arc::new(Discard), 16);
        Endpoint::new(settings, MultiplexedBackend::new(), dispatcher).unwrap()
    }

    #[tokio::test]
    async fn bind_on_init_binds_during_init() {
        let mut ep = endpoint(true);
        ep.init().await.unwrap();
        assert_eq!(ep.state(), LifecycleState::Initialized);
        assert!(ep.is_bound());
        let before = ep.local_addr();

        ep.start().await.unwrap();
        assert_eq!(ep.local_addr(), before, "start must not bind a second time");
        ep.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn bind_on_start_defers_bind() {
        let mut ep = endpoint(false);
        ep.init().await.unwrap();
        assert!(!ep.is_bound());
        ep.start().await.unwrap();
        assert!(ep.is_bound());
        ep.stop().await.unwrap();
        assert!(!ep.is_bound());
        assert_eq!(ep.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_init_leaves_endpoint_new() {
        let mut ep = endpoint(true);
        ep.stop().await.unwrap();
        assert_eq!(ep.state(), LifecycleState::New);

        ep.init().await.unwrap();
        assert_eq!(ep.state(), LifecycleState::Initialized);
        assert!(ep.is_bound());
        ep.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn start_from_new_initializes_first() {
        let mut ep = endpoint(true);
        ep.start().await.unwrap();
        assert_eq!(ep.state(), LifecycleState::Running);
        ep.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let mut ep = endpoint(true);
        assert!(matches!(
            ep.resume().await,
            Err(EndpointError::IllegalState { operation: "resume", .. })
        ));
        ep.init().await.unwrap();
        assert!(matches!(ep.init().await, Err(EndpointError::IllegalState { .. })));
        assert!(matches!(ep.pause().await, Err(EndpointError::IllegalState { .. })));

        ep.destroy().await.unwrap();
        assert!(!ep.is_bound());
        for result in [
            ep.start().await,
            ep.stop().await,
            ep.destroy().await,
        ] {
            assert!(matches!(
                result,
                Err(EndpointError::IllegalState { state: LifecycleState::Destroyed, .. })
            ));
        }
    }

    #[tokio::test]
    async fn pause_keeps_socket_and_resume_reuses_it() {
        let mut ep = endpoint(true);
        ep.start().await.unwrap();
        let bound = ep.local_addr();

        ep.pause().await.unwrap();
        assert_eq!(ep.state(), LifecycleState::Paused);
        assert_eq!(ep.local_addr(), bound);

        ep.resume().await.unwrap();
        assert_eq!(ep.state(), LifecycleState::Running);
        assert_eq!(ep.local_addr(), bound);
        ep.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_family_is_rejected_before_bind() {
        let settings = EndpointSettings::new("native", BindAddress::unix("/tmp/never-bound.sock"));
        let dispatcher = Dispatcher::new("native", Arc::new(Discard), 16);
        let result = Endpoint::new(settings, NativeBackend::new(1).unwrap(), dispatcher);
        assert!(matches!(
            result,
            Err(EndpointError::Unsupported { backend: BackendKind::Native, .. })
        ));
    }
}
