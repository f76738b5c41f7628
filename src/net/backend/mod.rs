//! Socket backends.
//!
//! # Data Flow
//! ```text
//! BindAddress + SocketOptions
//!     → create_listen_socket (bind + listen, per-backend API)
//!     → Handle (exclusively owned by one Endpoint, shared with its acceptors)
//!     → accept → Connection | Closed
//!     → close_listen_socket (wake acceptors, shut down)
//!     → last owner drops Handle (descriptor closed, port free)
//! ```
//!
//! # Variants
//! - `blocking`: std sockets, blocking `accept` on tokio's blocking pool
//! - `multiplexed`: tokio sockets driven by the reactor
//! - `native`: raw socket2 sockets drawn from an explicit handle pool

mod blocking;
mod multiplexed;
mod native;

pub use blocking::{BlockingBackend, BlockingSocket};
pub use multiplexed::{MultiplexedBackend, MultiplexedSocket};
pub use native::{NativeBackend, NativePool, NativeSocket};

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::net::address::{AddressFamily, BindAddress, LocalAddr};
use crate::net::connection::Connection;
use crate::net::error::EndpointError;

/// Which backend serves an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Blocking,
    #[default]
    Multiplexed,
    Native,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Blocking,
        BackendKind::Multiplexed,
        BackendKind::Native,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Blocking => "blocking",
            BackendKind::Multiplexed => "multiplexed",
            BackendKind::Native => "native",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" => Ok(BackendKind::Blocking),
            "multiplexed" => Ok(BackendKind::Multiplexed),
            "native" => Ok(BackendKind::Native),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Options applied to a listen socket before it starts listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// `SO_REUSEADDR` on TCP listen sockets.
    pub reuse_address: bool,
    /// `SO_KEEPALIVE`, inherited by accepted TCP connections.
    pub keep_alive: bool,
    /// Listen backlog.
    pub backlog: u32,
    /// Mode applied to a Unix domain socket file after bind.
    pub unix_permissions: Option<u32>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            keep_alive: true,
            backlog: 100,
            unix_permissions: None,
        }
    }
}

/// Result of one `accept` call.
#[derive(Debug)]
pub enum Accepted {
    Connection(Connection),
    /// The listen handle was closed while (or before) waiting.
    Closed,
}

/// A bound listen socket owned by one endpoint.
pub trait ListenHandle: Send + Sync + 'static {
    fn local_addr(&self) -> &LocalAddr;

    /// True once `close_listen_socket` has run on this handle.
    fn is_closed(&self) -> bool;
}

/// Capability set every backend provides.
///
/// One backend instance belongs to exactly one endpoint; nothing is shared
/// between backends.
pub trait SocketBackend: Send + Sync + 'static {
    type Handle: ListenHandle;

    /// True if dropping a pending `accept` future never loses a connection.
    /// Acceptors of such backends stop on the halt flag without a dial.
    const CANCEL_SAFE_ACCEPT: bool = false;

    fn kind(&self) -> BackendKind;

    fn supports(&self, family: AddressFamily) -> bool;

    /// Create a socket bound to `address` and listening.
    ///
    /// Anything allocated before a failure is released before the error is
    /// returned.
    fn create_listen_socket(
        &self,
        address: &BindAddress,
        options: &SocketOptions,
    ) -> Result<Self::Handle, EndpointError>;

    /// Mark the handle closed, unblock every pending `accept` and shut the
    /// socket down. Calling it again is a no-op.
    fn close_listen_socket(&self, handle: &Self::Handle);

    /// Wait for the next connection. Returns [`Accepted::Closed`] once the
    /// handle is closed.
    fn accept(
        &self,
        handle: &Arc<Self::Handle>,
    ) -> impl Future<Output = io::Result<Accepted>> + Send;

    /// Wake up to `acceptors` blocked `accept` calls without closing the
    /// socket, by dialing it.
    fn unlock_accept(&self, handle: &Self::Handle, acceptors: usize) {
        unlock_accept(handle.local_addr(), acceptors);
    }

    /// Release backend-level pooled resources. Every handle created by this
    /// backend must already be dropped.
    fn destroy(&self) -> Result<(), EndpointError> {
        Ok(())
    }
}

const UNLOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Dial `local` once per blocked acceptor so each of them returns from
/// `accept`. The connections are closed immediately. A failed dial does not
/// stop the others; returns how many failed.
pub(crate) fn unlock_accept(local: &LocalAddr, acceptors: usize) -> usize {
    let target = local.connectable();
    let mut failed = 0;
    for _ in 0..acceptors {
        let result = match &target {
            LocalAddr::Inet(addr) => {
                std::net::TcpStream::connect_timeout(addr, UNLOCK_TIMEOUT).map(drop)
            }
            #[cfg(unix)]
            LocalAddr::Unix(path) => std::os::unix::net::UnixStream::connect(path).map(drop),
            #[cfg(not(unix))]
            LocalAddr::Unix(_) => Ok(()),
        };
        if let Err(e) = result {
            failed += 1;
            tracing::warn!(address = %target, error = %e, "unlock connection failed");
        }
    }
    failed
}

/// Close flag for listen sockets whose `accept` blocks a thread.
///
/// Counts the threads inside `accept` so that closing can dial exactly that
/// many wake-up connections. A thread registers before it checks the flag,
/// and the closer raises the flag before it reads the count, so no thread
/// can slip into `accept` unnoticed.
#[derive(Debug, Default)]
pub(crate) struct AcceptGate {
    closed: AtomicBool,
    waiting: AtomicUsize,
}

impl AcceptGate {
    /// Run a blocking `accept` unless the gate is closed. Returns `Ok(None)`
    /// when the gate was closed before or during the call.
    pub(crate) fn run<T>(&self, accept: impl FnOnce() -> io::Result<T>) -> io::Result<Option<T>> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let result = if self.is_closed() {
            Ok(None)
        } else {
            accept().map(Some)
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(Some(_)) | Err(_) if self.is_closed() => Ok(None),
            other => other,
        }
    }

    /// Raise the flag and wake every thread blocked in `accept`. Returns
    /// false if the gate was already closed.
    pub(crate) fn close(&self, local: &LocalAddr) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        unlock_accept(local, self.waiting.load(Ordering::SeqCst));
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Shut down both directions of a listen socket. On Linux this also fails
/// any thread blocked in `accept`. Errors are expected on platforms that
/// reject shutdown of a listening socket and are ignored.
pub(crate) fn shutdown_listener(socket: SockRef<'_>) {
    if let Err(e) = socket.shutdown(std::net::Shutdown::Both) {
        tracing::trace!(error = %e, "listen socket shutdown");
    }
}

/// Create a TCP listen socket with socket2, applying `options`.
pub(crate) fn listen_tcp(
    address: &BindAddress,
    resolved: SocketAddr,
    options: &SocketOptions,
) -> Result<Socket, EndpointError> {
    let socket = Socket::new(Domain::for_address(resolved), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| EndpointError::Resource(format!("socket allocation failed: {}", e)))?;
    if cfg!(unix) && options.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(|e| EndpointError::bind(address, e))?;
    }
    // Deal with firewalls that tend to drop inactive sockets.
    socket
        .set_keepalive(options.keep_alive)
        .map_err(|e| EndpointError::bind(address, e))?;
    socket
        .bind(&resolved.into())
        .map_err(|e| EndpointError::bind(address, e))?;
    socket
        .listen(backlog(options))
        .map_err(|e| EndpointError::bind(address, e))?;
    Ok(socket)
}

/// Create a Unix domain listen socket at `path`.
#[cfg(unix)]
pub(crate) fn listen_unix(
    address: &BindAddress,
    path: &std::path::Path,
    options: &SocketOptions,
) -> Result<Socket, EndpointError> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
        .map_err(|e| EndpointError::Resource(format!("socket allocation failed: {}", e)))?;
    let sock_addr = socket2::SockAddr::unix(path).map_err(|e| EndpointError::bind(address, e))?;
    socket
        .bind(&sock_addr)
        .map_err(|e| EndpointError::bind(address, e))?;
    socket
        .listen(backlog(options))
        .map_err(|e| EndpointError::bind(address, e))?;
    Ok(socket)
}

fn backlog(options: &SocketOptions) -> i32 {
    i32::try_from(options.backlog).unwrap_or(i32::MAX)
}

/// Whether this host can serve Unix domain sockets at all.
pub(crate) fn unix_supported() -> bool {
    cfg!(unix)
}
