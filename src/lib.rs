//! Listen endpoints with pluggable socket backends.
//!
//! An endpoint binds a TCP or Unix domain listen socket, runs acceptor loops
//! on it and hands connections to a protocol handler. The moment of binding
//! is controlled by a bind policy, and the socket is provided by one of three
//! backends (blocking, multiplexed, native).

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::ServerConfig;
pub use lifecycle::LifecycleState;
pub use net::{AnyEndpoint, BackendKind, BindAddress, Endpoint, EndpointError, EndpointSettings};
pub use server::{Connector, Server, StartupError};
