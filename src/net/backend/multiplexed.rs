//! Multiplexed backend: tokio listeners driven by the runtime's reactor.

use std::io;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;

use super::{unix_supported, Accepted, BackendKind, ListenHandle, SocketBackend, SocketOptions};
use crate::net::address::{AddressFamily, BindAddress, LocalAddr, PeerAddr, SocketFile};
use crate::net::connection::{Connection, Stream};
use crate::net::error::EndpointError;

/// Backend built on tokio's event-driven sockets.
///
/// Pending accepts are registered with the reactor and cost no thread.
/// Closing a handle flips a watch channel that every pending accept selects
/// on. Accepting is cancel-safe, so pausing needs no wake-up dial.
#[derive(Debug, Default)]
pub struct MultiplexedBackend;

impl MultiplexedBackend {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug)]
enum TokioListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// Listen handle of the multiplexed backend.
#[derive(Debug)]
pub struct MultiplexedSocket {
    listener: TokioListener,
    local: LocalAddr,
    closed: watch::Sender<bool>,
    // Dropped after `listener`.
    _socket_file: Option<SocketFile>,
}

impl MultiplexedSocket {
    fn new(listener: TokioListener, local: LocalAddr, socket_file: Option<SocketFile>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            listener,
            local,
            closed,
            _socket_file: socket_file,
        }
    }

    async fn accept_stream(&self) -> io::Result<(Stream, PeerAddr)> {
        match &self.listener {
            TokioListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Stream::Tcp(stream), PeerAddr::Inet(peer)))
            }
            #[cfg(unix)]
            TokioListener::Unix(listener) => {
                let (stream, peer) = listener.accept().await?;
                let path = peer.as_pathname().map(|p| p.to_path_buf());
                Ok((Stream::Unix(stream), PeerAddr::Unix(path)))
            }
        }
    }
}

impl ListenHandle for MultiplexedSocket {
    fn local_addr(&self) -> &LocalAddr {
        &self.local
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

fn bind_tcp(address: &BindAddress, options: &SocketOptions) -> Result<TcpListener, EndpointError> {
    let resolved = address.resolve()?;
    let socket = if resolved.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| EndpointError::Resource(format!("socket allocation failed: {}", e)))?;

    if cfg!(unix) && options.reuse_address {
        socket
            .set_reuseaddr(true)
            .map_err(|e| EndpointError::bind(address, e))?;
    }
    socket
        .set_keepalive(options.keep_alive)
        .map_err(|e| EndpointError::bind(address, e))?;
    socket
        .bind(resolved)
        .map_err(|e| EndpointError::bind(address, e))?;
    socket
        .listen(options.backlog)
        .map_err(|e| EndpointError::bind(address, e))
}

impl SocketBackend for MultiplexedBackend {
    type Handle = MultiplexedSocket;

    const CANCEL_SAFE_ACCEPT: bool = true;

    fn kind(&self) -> BackendKind {
        BackendKind::Multiplexed
    }

    fn supports(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::Inet => true,
            AddressFamily::Unix => unix_supported(),
        }
    }

    fn create_listen_socket(
        &self,
        address: &BindAddress,
        options: &SocketOptions,
    ) -> Result<MultiplexedSocket, EndpointError> {
        match address {
            BindAddress::Tcp { .. } => {
                let listener = bind_tcp(address, options)?;
                let local = listener
                    .local_addr()
                    .map_err(|e| EndpointError::bind(address, e))?;
                Ok(MultiplexedSocket::new(
                    TokioListener::Tcp(listener),
                    LocalAddr::Inet(local),
                    None,
                ))
            }
            #[cfg(unix)]
            BindAddress::Unix { path } => {
                let listener =
                    tokio::net::UnixListener::bind(path).map_err(|e| EndpointError::bind(address, e))?;
                let socket_file = SocketFile::claim(path, options.unix_permissions)
                    .map_err(|e| EndpointError::bind(address, e))?;
                Ok(MultiplexedSocket::new(
                    TokioListener::Unix(listener),
                    LocalAddr::Unix(path.clone()),
                    Some(socket_file),
                ))
            }
            #[cfg(not(unix))]
            BindAddress::Unix { .. } => Err(EndpointError::Unsupported {
                backend: BackendKind::Multiplexed,
                feature: "unix domain sockets",
            }),
        }
    }

    fn close_listen_socket(&self, handle: &MultiplexedSocket) {
        handle.closed.send_if_modified(|closed| !std::mem::replace(closed, true));
    }

    async fn accept(&self, handle: &Arc<MultiplexedSocket>) -> io::Result<Accepted> {
        let mut closed = handle.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(Accepted::Closed);
        }

        tokio::select! {
            biased;

            _ = closed_signal(&mut closed) => Ok(Accepted::Closed),

            result = handle.accept_stream() => {
                let (stream, peer) = result?;
                Ok(Accepted::Connection(Connection::new(stream, peer)))
            }
        }
    }
}

async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
