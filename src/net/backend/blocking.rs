//! Blocking backend: std listen sockets, `accept` parked on the blocking pool.

use std::io;
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::TcpStream;

use super::{
    listen_tcp, shutdown_listener, unix_supported, AcceptGate, Accepted, BackendKind,
    ListenHandle, SocketBackend, SocketOptions,
};
use crate::net::address::{AddressFamily, BindAddress, LocalAddr, PeerAddr, SocketFile};
use crate::net::connection::{Connection, Stream};
use crate::net::error::EndpointError;

/// Backend built on `std::net` listeners.
///
/// Each pending `accept` occupies one thread of tokio's blocking pool until
/// a peer connects or the socket is closed.
#[derive(Debug, Default)]
pub struct BlockingBackend;

impl BlockingBackend {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug)]
enum StdListener {
    Tcp(std::net::TcpListener),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
}

enum StdStream {
    Tcp(std::net::TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

/// Listen handle of the blocking backend.
#[derive(Debug)]
pub struct BlockingSocket {
    listener: StdListener,
    local: LocalAddr,
    gate: AcceptGate,
    // Dropped after `listener`.
    _socket_file: Option<SocketFile>,
}

impl BlockingSocket {
    fn accept_blocking(&self) -> io::Result<Option<(StdStream, PeerAddr)>> {
        self.gate.run(|| match &self.listener {
            StdListener::Tcp(listener) => listener
                .accept()
                .map(|(stream, peer)| (StdStream::Tcp(stream), PeerAddr::Inet(peer))),
            #[cfg(unix)]
            StdListener::Unix(listener) => listener.accept().map(|(stream, peer)| {
                let path = peer.as_pathname().map(|p| p.to_path_buf());
                (StdStream::Unix(stream), PeerAddr::Unix(path))
            }),
        })
    }

    fn sock_ref(&self) -> SockRef<'_> {
        match &self.listener {
            StdListener::Tcp(listener) => SockRef::from(listener),
            #[cfg(unix)]
            StdListener::Unix(listener) => SockRef::from(listener),
        }
    }
}

impl ListenHandle for BlockingSocket {
    fn local_addr(&self) -> &LocalAddr {
        &self.local
    }

    fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

impl SocketBackend for BlockingBackend {
    type Handle = BlockingSocket;

    fn kind(&self) -> BackendKind {
        BackendKind::Blocking
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
    ) -> Result<BlockingSocket, EndpointError> {
        match address {
            BindAddress::Tcp { .. } => {
                let resolved = address.resolve()?;
                let listener = std::net::TcpListener::from(listen_tcp(address, resolved, options)?);
                let local = listener
                    .local_addr()
                    .map_err(|e| EndpointError::bind(address, e))?;
                Ok(BlockingSocket {
                    listener: StdListener::Tcp(listener),
                    local: LocalAddr::Inet(local),
                    gate: AcceptGate::default(),
                    _socket_file: None,
                })
            }
            #[cfg(unix)]
            BindAddress::Unix { path } => {
                let socket = super::listen_unix(address, path, options)?;
                let socket_file = SocketFile::claim(path, options.unix_permissions)
                    .map_err(|e| EndpointError::bind(address, e))?;
                Ok(BlockingSocket {
                    listener: StdListener::Unix(std::os::unix::net::UnixListener::from(socket)),
                    local: LocalAddr::Unix(path.clone()),
                    gate: AcceptGate::default(),
                    _socket_file: Some(socket_file),
                })
            }
            #[cfg(not(unix))]
            BindAddress::Unix { .. } => Err(EndpointError::Unsupported {
                backend: BackendKind::Blocking,
                feature: "unix domain sockets",
            }),
        }
    }

    fn close_listen_socket(&self, handle: &BlockingSocket) {
        if handle.gate.close(&handle.local) {
            shutdown_listener(handle.sock_ref());
        }
    }

    async fn accept(&self, handle: &Arc<BlockingSocket>) -> io::Result<Accepted> {
        let socket = Arc::clone(handle);
        let accepted = tokio::task::spawn_blocking(move || socket.accept_blocking())
            .await
            .map_err(io::Error::other)??;

        let Some((stream, peer)) = accepted else {
            return Ok(Accepted::Closed);
        };
        let stream = match stream {
            StdStream::Tcp(s) => {
                s.set_nonblocking(true)?;
                Stream::Tcp(TcpStream::from_std(s)?)
            }
            #[cfg(unix)]
            StdStream::Unix(s) => {
                s.set_nonblocking(true)?;
                Stream::Unix(tokio::net::UnixStream::from_std(s)?)
            }
        };
        Ok(Accepted::Connection(Connection::new(stream, peer)))
    }
}
